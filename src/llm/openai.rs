use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::client::{GenerateRequest, GenerateResponse, ModelClient, TokenUsage};
use super::error::ProviderError;
use super::types::{ChatMessage, ChatRequest, ChatResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";

/// Client for any OpenAI-compatible `/chat/completions` API.
pub struct OpenAiClient {
    name: String,
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl OpenAiClient {
    pub fn new(
        name: String,
        api_key: String,
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
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            client,
        })
    }

    fn build_messages(request: &GenerateRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system_prompt {
            messages.push(ChatMessage {
                role: "system".into(),
                content: system.clone(),
            });
        }
        messages.push(ChatMessage {
            role: "user".into(),
            content: request.prompt_with_context(),
        });
        messages
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let started = Instant::now();
        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        debug!(provider = %self.name, model = %self.model, "chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, e))?;

        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ProviderError::quota_exceeded(&self.name, response.headers()));
        }
        if status == StatusCode::NOT_FOUND {
            return Err(ProviderError::ModelNotFound {
                provider: self.name.clone(),
                model: self.model.clone(),
            });
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
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::from_transport(&self.name, e))?;

        let content = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| ProviderError::Malformed {
                provider: self.name.clone(),
                message: "response has no choices".to_string(),
            })?;

        Ok(GenerateResponse {
            content,
            provider_id: self.name.clone(),
            model: body.model,
            token_usage: body.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(r) if r.status().is_success() => true,
            Ok(r) => {
                warn!(
                    provider = %self.name,
                    status = r.status().as_u16(),
                    "openai health check rejected"
                );
                false
            }
            Err(e) => {
                warn!(provider = %self.name, error = %e, "openai health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::error::ProviderErrorKind;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(
            "openai".into(),
            "sk-test".into(),
            server.uri(),
            "gpt-3.5-turbo".into(),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn system_prompt_becomes_system_message() {
        let req = GenerateRequest::new("extraia")
            .with_system_prompt(Some("especialista".into()));
        let messages = OpenAiClient::build_messages(&req);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[1].content, "extraia");

        let bare = OpenAiClient::build_messages(&GenerateRequest::new("x"));
        assert_eq!(bare.len(), 1);
        assert_eq!(bare[0].role, "user");
    }

    #[tokio::test]
    async fn generate_sends_bearer_and_reads_first_choice() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "id": "chatcmpl-1",
            "model": "gpt-3.5-turbo",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "{\"local\": \"Rio\"}"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let resp = client_for(&server)
            .generate(&GenerateRequest::new("oi"))
            .await
            .unwrap();
        assert!(resp.content.contains("Rio"));
        assert_eq!(resp.token_usage.unwrap().total(), 8);
    }

    #[tokio::test]
    async fn rate_limit_honours_retry_after() {
        let server = MockServer::start().await;
        let limited = ResponseTemplate::new(429).insert_header("retry-after", "7");
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(limited)
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerateRequest::new("oi"))
            .await
            .unwrap_err();
        match err {
            ProviderError::QuotaExceeded { retry_after_ms, .. } => assert_eq!(retry_after_ms, 7000),
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_retry_after_does_not_overflow() {
        let server = MockServer::start().await;
        let huge = u64::MAX.to_string();
        let limited = ResponseTemplate::new(429);
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(limited.insert_header("retry-after", huge.as_str()))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerateRequest::new("oi"))
            .await
            .unwrap_err();
        match err {
            ProviderError::QuotaExceeded { retry_after_ms, .. } => {
                assert_eq!(retry_after_ms, u64::MAX)
            }
            other => panic!("expected QuotaExceeded, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_malformed() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "id": "chatcmpl-2",
            "model": "gpt-3.5-turbo",
            "choices": []
        });
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerateRequest::new("oi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::Malformed);
    }

    #[tokio::test]
    async fn server_error_is_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .generate(&GenerateRequest::new("oi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ProviderErrorKind::ServiceUnavailable);
    }

    #[tokio::test]
    async fn health_check_uses_models_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        assert!(!client_for(&server).health_check().await);
    }
}
