//! Taxonomia de erros dos provedores de modelo.
//!
//! Cada falha de [`ModelClient::generate`](super::ModelClient::generate) é
//! reduzida a uma das variantes de [`ProviderError`]. O [`ProviderErrorKind`]
//! correspondente é o que o retry e o circuit breaker consultam para decidir
//! se a falha é transitória (retentável, contada pelo breaker) ou permanente.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Espera usada num 429 sem `retry-after` legível.
const DEFAULT_RETRY_AFTER_MS: u64 = 1000;

/// Erros que um provedor de modelo pode devolver.
///
/// - [`Timeout`](ProviderError::Timeout) e
///   [`ServiceUnavailable`](ProviderError::ServiceUnavailable) são transitórios.
/// - [`QuotaExceeded`](ProviderError::QuotaExceeded),
///   [`ModelNotFound`](ProviderError::ModelNotFound) e
///   [`Malformed`](ProviderError::Malformed) são permanentes: repetir a chamada
///   não muda o resultado.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// A requisição excedeu o tempo limite do cliente HTTP.
    #[error("{provider}: request timed out")]
    Timeout { provider: String },

    /// Falha de conexão ou resposta 5xx.
    #[error("{provider}: service unavailable: {message}")]
    ServiceUnavailable { provider: String, message: String },

    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after` quando presente.
    #[error("{provider}: quota exceeded, retry after {retry_after_ms}ms")]
    QuotaExceeded { provider: String, retry_after_ms: u64 },

    /// HTTP 404 ou modelo ausente na listagem do servidor.
    #[error("{provider}: model not found: {model}")]
    ModelNotFound { provider: String, model: String },

    /// Qualquer outro 4xx, corpo vazio ou JSON que não decodifica.
    #[error("{provider}: malformed exchange: {message}")]
    Malformed { provider: String, message: String },
}

/// Classe de uma falha, sem os detalhes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    ServiceUnavailable,
    QuotaExceeded,
    ModelNotFound,
    Malformed,
}

impl ProviderErrorKind {
    /// Kinds that are retried and counted by the breaker unless configured otherwise.
    pub const TRANSIENT: [ProviderErrorKind; 2] =
        [ProviderErrorKind::Timeout, ProviderErrorKind::ServiceUnavailable];

    pub fn is_transient(self) -> bool {
        Self::TRANSIENT.contains(&self)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProviderErrorKind::Timeout => "timeout",
            ProviderErrorKind::ServiceUnavailable => "service_unavailable",
            ProviderErrorKind::QuotaExceeded => "quota_exceeded",
            ProviderErrorKind::ModelNotFound => "model_not_found",
            ProviderErrorKind::Malformed => "malformed",
        };
        write!(f, "{s}")
    }
}

impl ProviderError {
    pub fn kind(&self) -> ProviderErrorKind {
        match self {
            ProviderError::Timeout { .. } => ProviderErrorKind::Timeout,
            ProviderError::ServiceUnavailable { .. } => ProviderErrorKind::ServiceUnavailable,
            ProviderError::QuotaExceeded { .. } => ProviderErrorKind::QuotaExceeded,
            ProviderError::ModelNotFound { .. } => ProviderErrorKind::ModelNotFound,
            ProviderError::Malformed { .. } => ProviderErrorKind::Malformed,
        }
    }

    /// HTTP 429, com a espera lida do cabeçalho `retry-after` em segundos.
    pub fn quota_exceeded(provider: &str, headers: &HeaderMap) -> Self {
        let retry_after_ms = headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(DEFAULT_RETRY_AFTER_MS, |secs| secs.saturating_mul(1000));
        ProviderError::QuotaExceeded {
            provider: provider.to_string(),
            retry_after_ms,
        }
    }

    /// Converte um erro de transporte do `reqwest` na variante adequada.
    pub fn from_transport(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
            }
        } else if err.is_decode() {
            ProviderError::Malformed {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            ProviderError::ServiceUnavailable {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use reqwest::header::HeaderValue;

    use super::*;

    #[test]
    fn quota_exceeded_display() {
        let err = ProviderError::QuotaExceeded {
            provider: "openai".into(),
            retry_after_ms: 5000,
        };
        let expected = "openai: quota exceeded, retry after 5000ms";
        assert_eq!(err.to_string(), expected);
    }

    fn retry_after(value: Option<&'static str>) -> u64 {
        let mut headers = HeaderMap::new();
        if let Some(value) = value {
            headers.insert(RETRY_AFTER, HeaderValue::from_static(value));
        }
        match ProviderError::quota_exceeded("openai", &headers) {
            ProviderError::QuotaExceeded { retry_after_ms, .. } => retry_after_ms,
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[test]
    fn retry_after_header_is_read_in_seconds() {
        assert_eq!(retry_after(Some("7")), 7000);
        assert_eq!(retry_after(Some(" 2 ")), 2000);
        assert_eq!(retry_after(None), DEFAULT_RETRY_AFTER_MS);
        // Formato de data HTTP não é interpretado.
        let http_date = "Wed, 21 Oct 2015 07:28:00 GMT";
        assert_eq!(retry_after(Some(http_date)), DEFAULT_RETRY_AFTER_MS);
    }

    #[test]
    fn huge_retry_after_saturates() {
        assert_eq!(retry_after(Some("18446744073709551615")), u64::MAX);
    }

    #[test]
    fn transient_kinds() {
        assert!(ProviderErrorKind::Timeout.is_transient());
        assert!(ProviderErrorKind::ServiceUnavailable.is_transient());
        assert!(!ProviderErrorKind::QuotaExceeded.is_transient());
        assert!(!ProviderErrorKind::ModelNotFound.is_transient());
        assert!(!ProviderErrorKind::Malformed.is_transient());
    }

    #[test]
    fn kind_accessor() {
        let err = ProviderError::ModelNotFound {
            provider: "ollama".into(),
            model: "llama3.2".into(),
        };
        assert_eq!(err.kind(), ProviderErrorKind::ModelNotFound);
        assert_eq!(err.kind().to_string(), "model_not_found");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ProviderError>();
    }
}
