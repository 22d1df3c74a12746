use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::Classify;
use crate::llm::ProviderErrorKind;

/// Configuration for retry behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first. `1` disables retrying.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    /// Perturbs each delay by a uniform ±25%.
    pub jitter: bool,
    pub retryable: Vec<ProviderErrorKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter: true,
            retryable: ProviderErrorKind::TRANSIENT.to_vec(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt` (1-based): attempt 1 waits nothing, later
    /// ones wait `min(base_delay * exponential_base^(attempt - 2), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let factor = self.exponential_base.powi(attempt as i32 - 2);
        let raw = self.base_delay.as_secs_f64() * factor;
        let capped = raw.min(self.max_delay.as_secs_f64());

        let secs = if self.jitter {
            let scale: f64 = rand::rng().random_range(0.75..=1.25);
            capped * scale
        } else {
            capped
        };
        Duration::from_secs_f64(secs.max(0.0))
    }

    fn is_retryable(&self, kind: ProviderErrorKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// One failed attempt, kept to build the exhaustion error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryAttemptRecord {
    pub attempt_number: u32,
    /// Wait applied before this attempt.
    pub delay: Duration,
    pub error: String,
}

#[derive(Debug, Error)]
pub enum RetryError<E> {
    #[error("retry exhausted after {} attempts: {last}", attempts.len())]
    Exhausted {
        attempts: Vec<RetryAttemptRecord>,
        last: E,
    },

    /// The error kind is not retryable; no further attempts were made.
    #[error("{0}")]
    NonRetryable(E),
}

impl<E> RetryError<E> {
    /// The error that ended the loop.
    pub fn last(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
            RetryError::NonRetryable(e) => e,
        }
    }
}

impl<E: Classify> Classify for RetryError<E> {
    fn kind(&self) -> ProviderErrorKind {
        self.last().kind()
    }
}

/// Bounded retry loop with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    name: String,
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(name: impl Into<String>, config: RetryConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable kind, or
    /// `max_attempts` is reached. Backoff waits use `tokio::time::sleep`, so the
    /// worker is free for other tasks in the meantime.
    pub async fn execute<T, E, F, Fut>(&self, mut operation: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Classify + std::fmt::Display,
    {
        let max = self.config.max_attempts.max(1);
        let mut attempts = Vec::new();
        let mut attempt: u32 = 1;

        loop {
            let delay = self.config.delay_for_attempt(attempt);
            if !delay.is_zero() {
                debug!(
                    executor = %self.name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retry backoff"
                );
                tokio::time::sleep(delay).await;
            }

            match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(executor = %self.name, attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let kind = err.kind();
                    if !self.config.is_retryable(kind) {
                        debug!(executor = %self.name, attempt, %kind, "non-retryable failure");
                        return Err(RetryError::NonRetryable(err));
                    }

                    attempts.push(RetryAttemptRecord {
                        attempt_number: attempt,
                        delay,
                        error: err.to_string(),
                    });

                    if attempt >= max {
                        warn!(
                            executor = %self.name,
                            attempts = attempt,
                            error = %err,
                            "retry exhausted"
                        );
                        return Err(RetryError::Exhausted {
                            attempts,
                            last: err,
                        });
                    }
                    attempt += 1;
                }
            }
        }
    }
}
