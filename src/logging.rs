//! Inicialização do `tracing`.

use std::io;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingSettings;

/// Variável de ambiente que substitui o nível configurado.
pub const LOG_ENV: &str = "EXTRACTOR_LOG";

/// Diretiva efetiva: `EXTRACTOR_LOG` quando definida, senão o nível do arquivo.
/// Diretivas inválidas caem para "info".
pub fn build_filter(settings: &LoggingSettings, env_override: Option<String>) -> EnvFilter {
    let directive = env_override
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| settings.level.clone());
    EnvFilter::try_new(&directive)
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Instala o subscriber global. Retorna `false` se já havia um instalado;
/// logging nunca derruba o processo.
pub fn init(settings: &LoggingSettings) -> bool {
    let filter = build_filter(settings, std::env::var(LOG_ENV).ok());
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if settings.json {
        let layer = fmt::layer().json().with_writer(io::stderr);
        registry.with(layer).try_init()
    } else {
        let layer = fmt::layer().with_target(false).with_writer(io::stderr);
        registry.with(layer).try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_wins() {
        let settings = LoggingSettings::default();
        let filter = build_filter(&settings, Some("incident_extractor=debug".into()));
        assert_eq!(filter.to_string(), "incident_extractor=debug");
    }

    #[test]
    fn blank_override_uses_settings() {
        let settings = LoggingSettings {
            level: "warn".into(),
            json: false,
        };
        let filter = build_filter(&settings, Some("  ".into()));
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn second_init_is_harmless() {
        let settings = LoggingSettings::default();
        let _ = init(&settings);
        assert!(!init(&settings));
    }
}
