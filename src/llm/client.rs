use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// A single generation request, independent of provider wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    /// Extra key/value context. Providers without a native slot for it prepend
    /// it to the prompt.
    pub context: Option<serde_json::Value>,
}

impl GenerateRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: None,
            temperature: 0.1,
            max_tokens: None,
            context: None,
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Prompt with the context block prepended, for providers that take a single string.
    pub fn prompt_with_context(&self) -> String {
        match &self.context {
            Some(ctx) => format!("Context: {ctx}\n\nTask: {}", self.prompt),
            None => self.prompt.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// What a provider returns on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub content: String,
    pub provider_id: String,
    pub model: String,
    pub token_usage: Option<TokenUsage>,
    pub elapsed_ms: u64,
}

/// Uniform interface to one model provider.
///
/// `generate` fails with a [`ProviderError`]; `health_check` is a cheap,
/// read-only check that maps every internal failure to `false`.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Stable identifier used in logs, breaker names and `ExtractionResult::provider_id`.
    fn provider_id(&self) -> &str;

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    async fn health_check(&self) -> bool;

    /// Releases pooled resources. Default is a no-op.
    async fn close(&self) {}
}
