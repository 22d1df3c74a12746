pub mod client;
pub mod error;
pub mod mock;
pub mod ollama;
pub mod openai;
pub mod types;

pub use client::{GenerateRequest, GenerateResponse, ModelClient};
pub use error::{ProviderError, ProviderErrorKind};
pub use mock::MockClient;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
