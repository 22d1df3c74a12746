//! Tipos de dados para requisições e respostas dos provedores HTTP.
//!
//! Todas as structs derivam `Serialize` e `Deserialize` para conversão JSON
//! conforme o formato esperado pelos endpoints `/api/generate` do Ollama e
//! `/chat/completions` de APIs compatíveis com OpenAI.

use serde::{Deserialize, Serialize};

/// Corpo da requisição para `POST /api/generate` do Ollama.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaGenerateRequest {
    /// Nome do modelo local (ex.: "llama3.2").
    pub model: String,
    /// Prompt completo, já com o prompt de sistema embutido.
    pub prompt: String,
    /// Sempre `false`: a resposta é lida de uma vez.
    pub stream: bool,
    /// Parâmetros de amostragem.
    pub options: OllamaOptions,
}

/// Parâmetros de geração aceitos pelo Ollama.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaOptions {
    pub temperature: f32,
    /// Limite de tokens gerados. Omitido do JSON quando ausente.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_predict: Option<u32>,
}

/// Resposta de `POST /api/generate` com `stream = false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaGenerateResponse {
    pub model: String,
    /// Texto gerado.
    pub response: String,
    pub done: bool,
    /// Tokens do prompt avaliados.
    #[serde(default)]
    pub prompt_eval_count: Option<u32>,
    /// Tokens gerados.
    #[serde(default)]
    pub eval_count: Option<u32>,
}

/// Resposta de `GET /api/tags`, usada no health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaTagsResponse {
    #[serde(default)]
    pub models: Vec<OllamaModelTag>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaModelTag {
    pub name: String,
}

/// Corpo da requisição para `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Uma mensagem da conversa: papel "system", "user" ou "assistant".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Resposta de `POST /chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatChoice {
    pub index: u32,
    pub message: ChatMessage,
    /// `None` enquanto a geração ainda está em andamento.
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Estatísticas de consumo de tokens no formato OpenAI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ollama_request_omits_missing_num_predict() {
        let req = OllamaGenerateRequest {
            model: "llama3.2".into(),
            prompt: "Olá".into(),
            stream: false,
            options: OllamaOptions {
                temperature: 0.1,
                num_predict: None,
            },
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""stream":false"#));
        assert!(!json.contains("num_predict"));
    }

    #[test]
    fn ollama_response_deserialize_from_api_format() {
        let api_json = r#"{
            "model": "llama3.2",
            "created_at": "2025-08-23T14:00:00Z",
            "response": "{\"local\": \"São Paulo\"}",
            "done": true,
            "prompt_eval_count": 12,
            "eval_count": 30
        }"#;
        let resp: OllamaGenerateResponse = serde_json::from_str(api_json).unwrap();
        assert_eq!(resp.model, "llama3.2");
        assert!(resp.done);
        assert_eq!(resp.eval_count, Some(30));
        assert!(resp.response.contains("São Paulo"));
    }

    #[test]
    fn ollama_tags_tolerates_missing_models() {
        let tags: OllamaTagsResponse = serde_json::from_str("{}").unwrap();
        assert!(tags.models.is_empty());
    }

    #[test]
    fn chat_response_deserialize_from_api_format() {
        let api_json = r#"{
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1700000000,
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Resposta"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
        }"#;
        let resp: ChatResponse = serde_json::from_str(api_json).unwrap();
        assert_eq!(resp.choices[0].message.content, "Resposta");
        assert_eq!(resp.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total_tokens, 12);
    }

    #[test]
    fn chat_request_skips_max_tokens_when_absent() {
        let req = ChatRequest {
            model: "gpt-4o-mini".into(),
            messages: vec![ChatMessage {
                role: "user".into(),
                content: "oi".into(),
            }],
            temperature: 0.1,
            max_tokens: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("max_tokens"));
    }
}
