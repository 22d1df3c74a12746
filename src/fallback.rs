//! Cadeia ordenada de provedores.
//!
//! Cada provedor é protegido por `breaker.call(retry.execute(generate))`. O
//! primeiro sucesso encerra a cadeia; provedores seguintes nunca são chamados.

use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ExtractorConfig, ProviderKind, ProviderSettings};
use crate::error::ExtractorError;
use crate::llm::{
    GenerateRequest, GenerateResponse, MockClient, ModelClient, OllamaClient, OpenAiClient,
    ProviderError, ProviderErrorKind,
};
use crate::resilience::{
    BreakerConfig, BreakerError, CircuitBreaker, CircuitStatus, Classify, RetryConfig, RetryError,
    RetryExecutor,
};

/// A última falha de um provedor durante uma chamada à cadeia.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderFailure {
    pub provider: String,
    /// `None` quando o provedor foi pulado com o circuito aberto.
    pub kind: Option<ProviderErrorKind>,
    pub message: String,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Some(kind) => write!(f, "{} ({kind}): {}", self.provider, self.message),
            None => write!(f, "{}: {}", self.provider, self.message),
        }
    }
}

#[derive(Debug, Error)]
pub enum FallbackError {
    #[error("all providers failed: {}", format_failures(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("no providers configured")]
    NoProviders,
}

fn format_failures(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cliente, breaker e retry de um provedor.
pub struct ProviderSlot {
    client: Arc<dyn ModelClient>,
    breaker: CircuitBreaker,
    retry: RetryExecutor,
}

impl ProviderSlot {
    pub fn new(client: Arc<dyn ModelClient>, breaker: BreakerConfig, retry: RetryConfig) -> Self {
        let name = client.provider_id().to_string();
        Self {
            breaker: CircuitBreaker::new(name.clone(), breaker),
            retry: RetryExecutor::new(name, retry),
            client,
        }
    }

    pub fn name(&self) -> &str {
        self.client.provider_id()
    }

    async fn invoke(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, BreakerError<RetryError<ProviderError>>> {
        self.breaker
            .call(|| self.retry.execute(|| self.client.generate(request)))
            .await
    }

    async fn health(&self) -> ProviderHealth {
        ProviderHealth {
            provider: self.name().to_string(),
            healthy: self.client.health_check().await,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub healthy: bool,
}

/// Construído uma vez por processo e compartilhado entre execuções.
pub struct FallbackInvoker {
    slots: Vec<ProviderSlot>,
}

impl FallbackInvoker {
    pub fn new(slots: Vec<ProviderSlot>) -> Self {
        Self { slots }
    }

    /// Monta a cadeia a partir de `[[providers]]`, na ordem do arquivo.
    pub fn from_config(config: &ExtractorConfig) -> Result<Self, ExtractorError> {
        if config.providers.is_empty() {
            return Err(ExtractorError::Config("no providers configured".into()));
        }
        let slots = config
            .providers
            .iter()
            .map(|p| {
                let client = build_client(p)?;
                Ok(ProviderSlot::new(
                    client,
                    p.breaker_config(&config.breaker),
                    p.retry_config(&config.retry),
                ))
            })
            .collect::<Result<Vec<_>, ExtractorError>>()?;
        Ok(Self::new(slots))
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.name().to_string()).collect()
    }

    /// Tenta cada provedor em ordem. Provedores com o circuito fechado para
    /// chamadas são pulados sem gastar tentativas de retry.
    pub async fn generate_with_fallback(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, FallbackError> {
        if self.slots.is_empty() {
            return Err(FallbackError::NoProviders);
        }

        let mut failures = Vec::with_capacity(self.slots.len());
        for slot in &self.slots {
            if !slot.breaker.allows_call() {
                warn!(provider = slot.name(), "circuit open, skipping provider");
                failures.push(ProviderFailure {
                    provider: slot.name().to_string(),
                    kind: None,
                    message: "circuit open".to_string(),
                });
                continue;
            }

            match slot.invoke(request).await {
                Ok(response) => {
                    info!(
                        provider = slot.name(),
                        elapsed_ms = response.elapsed_ms,
                        tokens = response.token_usage.map(|u| u.total()),
                        "provider call succeeded"
                    );
                    return Ok(response);
                }
                Err(err) => {
                    let kind = match &err {
                        BreakerError::Open { .. } => None,
                        BreakerError::Inner(inner) => Some(inner.kind()),
                    };
                    warn!(
                        provider = slot.name(),
                        error = %err,
                        transient = kind.is_some_and(ProviderErrorKind::is_transient),
                        "provider call failed"
                    );
                    failures.push(ProviderFailure {
                        provider: slot.name().to_string(),
                        kind,
                        message: err.to_string(),
                    });
                }
            }
        }

        warn!(providers = failures.len(), "all providers failed");
        Err(FallbackError::AllProvidersFailed { failures })
    }

    /// Sonda todos os provedores ao mesmo tempo; um resultado não afeta o outro.
    pub async fn health_check_all(&self) -> Vec<ProviderHealth> {
        join_all(self.slots.iter().map(ProviderSlot::health)).await
    }

    pub fn circuit_status(&self) -> Vec<CircuitStatus> {
        self.slots.iter().map(|s| s.breaker.status()).collect()
    }

    pub async fn close_all(&self) {
        join_all(self.slots.iter().map(|s| s.client.close())).await;
    }
}

fn build_client(settings: &ProviderSettings) -> Result<Arc<dyn ModelClient>, ExtractorError> {
    let name = settings.name();
    let client: Arc<dyn ModelClient> = match settings.kind {
        ProviderKind::Ollama => {
            let client = OllamaClient::new(
                name,
                settings.base_url(),
                settings.model(),
                settings.timeout(),
            )?;
            Arc::new(client)
        }
        ProviderKind::OpenAi => {
            let api_key = settings
                .api_key
                .clone()
                .ok_or_else(|| missing_api_key(&name))?;
            let client = OpenAiClient::new(
                name,
                api_key,
                settings.base_url(),
                settings.model(),
                settings.timeout(),
            )?;
            Arc::new(client)
        }
        ProviderKind::Mock => Arc::new(MockClient::new(name)),
    };
    Ok(client)
}

fn missing_api_key(name: &str) -> ExtractorError {
    ExtractorError::Config(format!("provider '{name}' requires an api_key"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::resilience::CircuitState;

    fn fast_retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            jitter: false,
            ..RetryConfig::default()
        }
    }

    fn slot(client: Arc<MockClient>) -> ProviderSlot {
        ProviderSlot::new(client, BreakerConfig::default(), fast_retry())
    }

    fn unavailable(name: &str) -> ProviderError {
        ProviderError::ServiceUnavailable {
            provider: name.into(),
            message: "down".into(),
        }
    }

    fn request() -> GenerateRequest {
        GenerateRequest::new("oi")
    }

    #[tokio::test(start_paused = true)]
    async fn third_provider_serves_when_first_two_fail() {
        let first = Arc::new(MockClient::new("primary"));
        let second = Arc::new(MockClient::new("secondary"));
        let third = Arc::new(MockClient::new("tertiary"));
        for _ in 0..2 {
            first.push_err(unavailable("primary"));
            second.push_err(unavailable("secondary"));
        }
        third.push_ok("resposta");

        let invoker = FallbackInvoker::new(vec![
            slot(first.clone()),
            slot(second.clone()),
            slot(third.clone()),
        ]);

        let response = invoker.generate_with_fallback(&request()).await.unwrap();
        assert_eq!(response.content, "resposta");
        assert_eq!(response.provider_id, "tertiary");
        assert_eq!(first.calls(), 2);
        assert_eq!(second.calls(), 2);
        assert_eq!(third.calls(), 1);

        let status = invoker.circuit_status();
        assert_eq!(status[0].failure_count, 1);
        assert_eq!(status[2].failure_count, 0);
        assert_eq!(status[2].state, CircuitState::Closed);
    }

    #[tokio::test]
    async fn first_success_stops_the_chain() {
        let first = Arc::new(MockClient::new("primary"));
        let second = Arc::new(MockClient::new("secondary"));
        let invoker = FallbackInvoker::new(vec![slot(first.clone()), slot(second.clone())]);

        invoker.generate_with_fallback(&request()).await.unwrap();
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn all_failing_reports_last_error_per_provider() {
        let first = Arc::new(MockClient::new("primary"));
        let second = Arc::new(MockClient::new("secondary"));
        for _ in 0..2 {
            first.push_err(ProviderError::Timeout {
                provider: "primary".into(),
            });
        }
        second.push_err(ProviderError::ModelNotFound {
            provider: "secondary".into(),
            model: "x".into(),
        });
        let invoker = FallbackInvoker::new(vec![slot(first), slot(second.clone())]);

        let err = invoker
            .generate_with_fallback(&request())
            .await
            .unwrap_err();
        match err {
            FallbackError::AllProvidersFailed { failures } => {
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].kind, Some(ProviderErrorKind::Timeout));
                assert_eq!(failures[1].kind, Some(ProviderErrorKind::ModelNotFound));
            }
            other => panic!("unexpected {other:?}"),
        }
        // ModelNotFound não é retentável.
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn open_circuit_is_skipped_without_calls() {
        let first = Arc::new(MockClient::new("primary"));
        let second = Arc::new(MockClient::new("secondary"));
        let slots = vec![
            ProviderSlot::new(
                first.clone(),
                BreakerConfig {
                    failure_threshold: 1,
                    recovery_timeout: Duration::from_secs(600),
                    ..BreakerConfig::default()
                },
                RetryConfig {
                    max_attempts: 1,
                    ..fast_retry()
                },
            ),
            slot(second.clone()),
        ];
        let invoker = FallbackInvoker::new(slots);

        first.push_err(unavailable("primary"));
        invoker.generate_with_fallback(&request()).await.unwrap();
        assert_eq!(invoker.circuit_status()[0].state, CircuitState::Open);

        invoker.generate_with_fallback(&request()).await.unwrap();
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 2);
    }

    #[tokio::test]
    async fn health_checks_are_independent() {
        let up = Arc::new(MockClient::new("up"));
        let down = Arc::new(MockClient::new("down"));
        down.set_healthy(false);
        let invoker = FallbackInvoker::new(vec![slot(up), slot(down)]);

        let health = invoker.health_check_all().await;
        assert_eq!(health.len(), 2);
        assert!(health[0].healthy);
        assert!(!health[1].healthy);
    }

    #[tokio::test]
    async fn empty_chain_errors() {
        let invoker = FallbackInvoker::new(Vec::new());
        assert!(matches!(
            invoker.generate_with_fallback(&request()).await,
            Err(FallbackError::NoProviders)
        ));
    }

    #[test]
    fn from_config_builds_chain_in_order() {
        let mut config = ExtractorConfig::default().with_mock_provider();
        config.providers.push(ProviderSettings::new(ProviderKind::Ollama));
        let invoker = FallbackInvoker::from_config(&config).unwrap();
        assert_eq!(invoker.provider_names(), vec!["mock", "ollama"]);
    }

    #[test]
    fn from_config_requires_openai_key() {
        let mut config = ExtractorConfig::default();
        config.providers = vec![ProviderSettings::new(ProviderKind::OpenAi)];
        assert!(matches!(
            FallbackInvoker::from_config(&config),
            Err(ExtractorError::Config(_))
        ));
    }
}
