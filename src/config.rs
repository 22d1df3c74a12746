//! Configuração do extrator carregada a partir de `extractor.toml`.
//!
//! A struct [`ExtractorConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `OLLAMA_BASE_URL`, `OLLAMA_MODEL`, `OPENAI_API_KEY`
//! e `OPENAI_MODEL` têm precedência sobre o arquivo.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::llm::{ollama, openai};
use crate::resilience::{BreakerConfig, RetryConfig};

pub const CONFIG_FILE: &str = "extractor.toml";

/// Configuração de nível superior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub workflow: WorkflowSettings,
    pub normalizer: NormalizerSettings,
    /// Retry padrão, usado por provedores sem override próprio.
    pub retry: RetrySettings,
    /// Breaker padrão, usado por provedores sem override próprio.
    pub breaker: BreakerSettings,
    /// Provedores em ordem de preferência (o primeiro é o primário).
    pub providers: Vec<ProviderSettings>,
    pub logging: LoggingSettings,
    pub generation: GenerationSettings,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowSettings::default(),
            normalizer: NormalizerSettings::default(),
            retry: RetrySettings::default(),
            breaker: BreakerSettings::default(),
            providers: default_providers(),
            logging: LoggingSettings::default(),
            generation: GenerationSettings::default(),
        }
    }
}

/// Limites e palavras-chave do fluxo.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    pub max_attempts: u32,
    /// Acima deste número de erros o coordenador aborta.
    pub max_errors: usize,
    /// Acima deste número de erros críticos o fluxo termina em ERROR.
    pub max_critical_errors: usize,
    /// Campos nulos tolerados antes de a extração ser considerada incompleta.
    pub max_missing_fields: usize,
    pub timeout_secs: u64,
    /// Limite rígido de passos do laço, independente das regras do coordenador.
    pub iteration_cap: u32,
    pub recoverable_keywords: Vec<String>,
    pub critical_keywords: Vec<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            max_errors: 3,
            max_critical_errors: 2,
            max_missing_fields: 2,
            timeout_secs: 120,
            iteration_cap: 32,
            recoverable_keywords: ["timeout", "connection", "temporary", "retry"]
                .map(String::from)
                .to_vec(),
            critical_keywords: ["validation", "format", "parsing", "schema"]
                .map(String::from)
                .to_vec(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    /// Sinais de complexidade necessários para acionar o modelo.
    pub complexity_threshold: usize,
    /// Textos maiores são truncados (em caracteres).
    pub max_length: usize,
    pub min_length_ratio: f64,
    pub max_length_ratio: f64,
    pub llm_enabled: bool,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            complexity_threshold: 2,
            max_length: 5000,
            min_length_ratio: 0.5,
            max_length_ratio: 2.0,
            llm_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter: true,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            exponential_base: self.exponential_base,
            jitter: self.jitter,
            ..RetryConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout_secs: 30,
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            ..BreakerConfig::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenAi,
    Mock,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Ollama => write!(f, "ollama"),
            ProviderKind::OpenAi => write!(f, "openai"),
            ProviderKind::Mock => write!(f, "mock"),
        }
    }
}

/// Um provedor da cadeia de fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub kind: ProviderKind,
    /// Identificador nos logs e no status do breaker. Padrão: o nome do tipo.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    #[serde(default)]
    pub breaker: Option<BreakerSettings>,
}

fn default_provider_timeout_secs() -> u64 {
    120
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            name: None,
            base_url: None,
            model: None,
            api_key: None,
            timeout_secs: default_provider_timeout_secs(),
            retry: None,
            breaker: None,
        }
    }

    pub fn name(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.kind.to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| match self.kind {
            ProviderKind::Ollama => ollama::DEFAULT_BASE_URL.to_string(),
            ProviderKind::OpenAi => openai::DEFAULT_BASE_URL.to_string(),
            ProviderKind::Mock => String::new(),
        })
    }

    pub fn model(&self) -> String {
        self.model.clone().unwrap_or_else(|| match self.kind {
            ProviderKind::Ollama => ollama::DEFAULT_MODEL.to_string(),
            ProviderKind::OpenAi => openai::DEFAULT_MODEL.to_string(),
            ProviderKind::Mock => "mock".to_string(),
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry efetivo: override do provedor ou o padrão global.
    pub fn retry_config(&self, fallback: &RetrySettings) -> RetryConfig {
        let settings = self.retry.as_ref().unwrap_or(fallback);
        settings.to_retry_config()
    }

    pub fn breaker_config(&self, fallback: &BreakerSettings) -> BreakerConfig {
        let settings = self.breaker.as_ref().unwrap_or(fallback);
        settings.to_breaker_config()
    }
}

// Ollama local: backoff mais lento e recuperação mais longa que a API remota.
fn default_providers() -> Vec<ProviderSettings> {
    vec![ProviderSettings {
        retry: Some(RetrySettings {
            base_delay_ms: 2000,
            ..RetrySettings::default()
        }),
        breaker: Some(BreakerSettings {
            failure_threshold: 3,
            recovery_timeout_secs: 60,
        }),
        ..ProviderSettings::new(ProviderKind::Ollama)
    }]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Diretiva do `EnvFilter` (ex.: "info", "incident_extractor=debug").
    pub level: String,
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            max_tokens: Some(1000),
        }
    }
}

impl ExtractorConfig {
    /// Carrega a configuração de `extractor.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::read_file(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides(|k| std::env::var(k).ok()))
    }

    /// Carrega um arquivo específico; ausente é erro.
    pub fn from_path(path: &Path) -> Result<Self> {
        let config = Self::read_file(path)?;
        Ok(config.with_env_overrides(|k| std::env::var(k).ok()))
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config = toml::from_str::<ExtractorConfig>(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Aplica as variáveis de ambiente. `lookup` é injetável para os testes.
    pub fn with_env_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        for provider in self.providers_of(ProviderKind::Ollama) {
            if let Some(url) = non_empty("OLLAMA_BASE_URL") {
                provider.base_url = Some(url);
            }
            if let Some(model) = non_empty("OLLAMA_MODEL") {
                provider.model = Some(model);
            }
        }

        if let Some(key) = non_empty("OPENAI_API_KEY") {
            let has_openai = self.providers_of(ProviderKind::OpenAi).next().is_some();
            if !has_openai {
                self.providers.push(ProviderSettings {
                    breaker: Some(BreakerSettings {
                        failure_threshold: 3,
                        recovery_timeout_secs: 30,
                    }),
                    ..ProviderSettings::new(ProviderKind::OpenAi)
                });
            }
            for provider in self.providers_of(ProviderKind::OpenAi) {
                provider.api_key = Some(key.clone());
            }
        }
        if let Some(model) = non_empty("OPENAI_MODEL") {
            for provider in self.providers_of(ProviderKind::OpenAi) {
                provider.model = Some(model.clone());
            }
        }

        self
    }

    fn providers_of(&mut self, kind: ProviderKind) -> impl Iterator<Item = &mut ProviderSettings> {
        self.providers.iter_mut().filter(move |p| p.kind == kind)
    }

    /// Substitui a cadeia por um único provedor mock (modo demo).
    pub fn with_mock_provider(mut self) -> Self {
        self.providers = vec![ProviderSettings::new(ProviderKind::Mock)];
        self
    }
}
