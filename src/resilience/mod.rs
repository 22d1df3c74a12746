//! Proteções em volta de cada chamada a um provedor: retry com backoff e
//! circuit breaker.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState, CircuitStatus};
pub use retry::{RetryConfig, RetryError, RetryExecutor};

use crate::llm::{ProviderError, ProviderErrorKind};

/// Reduz um erro à sua classe, para que retry e breaker filtrem por tipo.
pub trait Classify {
    fn kind(&self) -> ProviderErrorKind;
}

impl Classify for ProviderError {
    fn kind(&self) -> ProviderErrorKind {
        ProviderError::kind(self)
    }
}
