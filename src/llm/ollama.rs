use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::client::{GenerateRequest, GenerateResponse, ModelClient, TokenUsage};
use super::error::ProviderError;
use super::types::{
    OllamaGenerateRequest, OllamaGenerateResponse, OllamaOptions, OllamaTagsResponse,
};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Client for a local Ollama server.
pub struct OllamaClient {
    name: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OllamaClient {
    pub fn new(
        name: String,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            name,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }

    /// Ollama has no system-message slot in `/api/generate`, so the system
    /// prompt is folded into the single prompt string.
    fn build_prompt(request: &GenerateRequest) -> String {
        let prompt = request.prompt_with_context();
        match &request.system_prompt {
            Some(system) => format!("System: {system}\n\nUser: {prompt}\n\nAssistant:"),
            None => prompt,
        }
    }

    /// `llama3.2` também casa com `llama3.2:latest`.
    fn serves(&self, listed: &str) -> bool {
        listed == self.model || listed.split(':').next() == Some(self.model.as_str())
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let started = Instant::now();
        let body = OllamaGenerateRequest {
            model: self.model.clone(),
            prompt: Self::build_prompt(request),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        };

        debug!(
            provider = %self.name,
            model = %self.model,
            prompt_len = body.prompt.len(),
            "ollama generate"
        );

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, e))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::ModelNotFound {
                provider: self.name.clone(),
                model: self.model.clone(),
            });
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::quota_exceeded(&self.name, response.headers()));
        }
        if status.is_server_error() {
            return Err(ProviderError::ServiceUnavailable {
                provider: self.name.clone(),
                message: format!("server error {}", status.as_u16()),
            });
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ProviderError::Malformed {
                provider: self.name.clone(),
                message: format!("status {}: {message}", status.as_u16()),
            });
        }

        let body = response
            .json::<OllamaGenerateResponse>()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, e))?;

        if body.response.trim().is_empty() {
            return Err(ProviderError::Malformed {
                provider: self.name.clone(),
                message: "empty response".to_string(),
            });
        }

        let token_usage = match (body.prompt_eval_count, body.eval_count) {
            (None, None) => None,
            (prompt, completion) => Some(TokenUsage {
                prompt_tokens: prompt.unwrap_or(0),
                completion_tokens: completion.unwrap_or(0),
            }),
        };

        Ok(GenerateResponse {
            content: body.response,
            provider_id: self.name.clone(),
            model: body.model,
            token_usage,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Healthy only when the server answers and lists the configured model.
    async fn health_check(&self) -> bool {
        let response = match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(provider = %self.name, error = %e, "ollama health check failed");
                return false;
            }
        };
        if !response.status().is_success() {
            warn!(
                provider = %self.name,
                status = response.status().as_u16(),
                "ollama health check rejected"
            );
            return false;
        }
        match response.json::<OllamaTagsResponse>().await {
            Ok(tags) => tags.models.iter().any(|m| self.serves(&m.name)),
            Err(_) => false,
        }
    }
}
