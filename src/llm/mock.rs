use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;

use super::client::{GenerateRequest, GenerateResponse, ModelClient, TokenUsage};
use super::error::ProviderError;

/// Resposta padrão para prompts de extração.
pub const CANNED_EXTRACTION: &str = r#"{
  "data_ocorrencia": "2025-08-23 14:00",
  "local": "São Paulo",
  "tipo_incidente": "Falha no servidor",
  "impacto": "Sistema de faturamento indisponível por 2 horas"
}"#;

pub const CANNED_DEFAULT: &str = "Mock response for testing purposes.";

/// Provedor local sem rede, usado no modo demo e nos testes.
///
/// Respostas roteirizadas (via [`MockClient::push_ok`] / [`MockClient::push_err`])
/// são consumidas em ordem. Com a fila vazia, prompts que mencionam "json" ou
/// "extraia" recebem [`CANNED_EXTRACTION`] e os demais [`CANNED_DEFAULT`].
pub struct MockClient {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    calls: AtomicU32,
    healthy: AtomicBool,
    prompts: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl MockClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_ok(&self, content: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(content.into()));
        }
    }

    pub fn push_err(&self, err: ProviderError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(err));
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Quantas vezes `generate` foi chamado.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Prompts recebidos, na ordem.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    fn canned(prompt: &str) -> String {
        let lower = prompt.to_lowercase();
        if lower.contains("json") || lower.contains("extraia") {
            CANNED_EXTRACTION.to_string()
        } else {
            CANNED_DEFAULT.to_string()
        }
    }
}

#[async_trait]
impl ModelClient for MockClient {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(request.prompt.clone());
        }

        let next = self.script.lock().ok().and_then(|mut s| s.pop_front());
        let content = match next {
            Some(scripted) => scripted?,
            None => Self::canned(&request.prompt),
        };

        let prompt_tokens = request.prompt.split_whitespace().count() as u32;
        let completion_tokens = content.split_whitespace().count() as u32;
        Ok(GenerateResponse {
            content,
            provider_id: self.name.clone(),
            model: "mock".to_string(),
            token_usage: Some(TokenUsage {
                prompt_tokens,
                completion_tokens,
            }),
            elapsed_ms: 0,
        })
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
