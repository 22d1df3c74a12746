use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use super::Classify;
use crate::llm::ProviderErrorKind;

#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive counted failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a trial call is allowed.
    pub recovery_timeout: Duration,
    /// Failure kinds that count toward the threshold. Others pass through untouched.
    pub expected: Vec<ProviderErrorKind>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(30),
            expected: ProviderErrorKind::TRANSIENT.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStatus {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Milliseconds until a trial call is allowed; only set while open.
    pub next_retry_in_ms: Option<u64>,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("circuit '{name}' is open ({failure_count} failures)")]
    Open {
        name: String,
        failure_count: u32,
        last_failure_at: Option<DateTime<Utc>>,
    },

    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<DateTime<Utc>>,
    next_retry_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Per-provider failure tracker.
///
/// Every transition happens under one short mutex section that is never held
/// across an `.await`, so concurrent outcomes cannot double-open or mis-reset
/// the circuit. In `HalfOpen` exactly one trial call is admitted.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// Releases the half-open trial slot if the call is dropped before it records
/// an outcome (e.g. the whole run timed out).
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.breaker.lock().trial_in_flight = false;
        }
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                next_retry_at: None,
                trial_in_flight: false,
            }),
        }
    }

    // A poisoned lock only means another task panicked mid-update; the counters
    // are still usable.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a call made now would reach the wrapped operation. Does not
    /// change state.
    pub fn allows_call(&self) -> bool {
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => inner.next_retry_at.is_none_or(|at| Instant::now() >= at),
            CircuitState::HalfOpen => !inner.trial_in_flight,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Runs `operation` under the breaker.
    pub async fn call<T, E, F, Fut>(&self, operation: F) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify,
    {
        let is_trial = self.acquire()?;
        let mut guard = TrialGuard {
            breaker: self,
            armed: is_trial,
        };

        let result = operation().await;
        guard.armed = false;

        match result {
            Ok(value) => {
                self.on_success();
                Ok(value)
            }
            Err(err) => {
                self.on_failure(err.kind());
                Err(BreakerError::Inner(err))
            }
        }
    }

    /// Admits or rejects a call. Returns `true` when the call is the half-open trial.
    fn acquire<E>(&self) -> Result<bool, BreakerError<E>> {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Ok(false),
            CircuitState::Open => {
                let ready = inner.next_retry_at.is_none_or(|at| Instant::now() >= at);
                if !ready {
                    return Err(self.open_error(&inner));
                }
                self.transition(&mut inner, CircuitState::HalfOpen);
                inner.trial_in_flight = true;
                Ok(true)
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    return Err(self.open_error(&inner));
                }
                inner.trial_in_flight = true;
                Ok(true)
            }
        }
    }

    fn on_success(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.trial_in_flight = false;
        inner.next_retry_at = None;
        self.transition(&mut inner, CircuitState::Closed);
    }

    fn on_failure(&self, kind: ProviderErrorKind) {
        let mut inner = self.lock();
        inner.trial_in_flight = false;
        if !self.config.expected.contains(&kind) {
            return;
        }

        inner.failure_count += 1;
        inner.last_failure_at = Some(Utc::now());

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.failure_count >= self.config.failure_threshold;
        if should_open {
            inner.next_retry_at = Some(Instant::now() + self.config.recovery_timeout);
            self.transition(&mut inner, CircuitState::Open);
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        if to == CircuitState::Open {
            warn!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                failure_count = inner.failure_count,
                "circuit breaker opened"
            );
        } else {
            info!(
                breaker = %self.name,
                from = from.as_str(),
                to = to.as_str(),
                "circuit breaker transition"
            );
        }
    }

    fn open_error<E>(&self, inner: &Inner) -> BreakerError<E> {
        BreakerError::Open {
            name: self.name.clone(),
            failure_count: inner.failure_count,
            last_failure_at: inner.last_failure_at,
        }
    }

    /// Forces `Closed` with zero failures.
    #[allow(dead_code)]
    pub fn reset(&self) {
        let mut inner = self.lock();
        inner.failure_count = 0;
        inner.next_retry_at = None;
        inner.trial_in_flight = false;
        self.transition(&mut inner, CircuitState::Closed);
    }

    pub fn status(&self) -> CircuitStatus {
        let inner = self.lock();
        let now = Instant::now();
        let next_retry_in_ms = match (inner.state, inner.next_retry_at) {
            (CircuitState::Open, Some(at)) => {
                let remaining = at.saturating_duration_since(now);
                Some(remaining.as_millis() as u64)
            }
            _ => None,
        };
        CircuitStatus {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            last_failure_at: inner.last_failure_at,
            next_retry_in_ms,
        }
    }
}
