//! Interface de linha de comando baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (extract, health,
//! info, demo) e flags globais (--config, --timeout, --max-attempts,
//! --verbose, --json-logs).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Extrai data, local, tipo e impacto de relatos de incidentes de TI em português.
#[derive(Debug, Parser)]
#[command(name = "incident-extractor", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Arquivo de configuração TOML (padrão: ./extractor.toml se existir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Tempo limite da execução, em segundos.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Número máximo de tentativas de extração.
    #[arg(long, global = true, value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Habilita logs de depuração.
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,

    /// Emite logs em JSON.
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extrai as informações de um relato de incidente.
    Extract {
        /// Texto do relato.
        text: Option<String>,

        /// Lê o relato de um arquivo.
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Imprime apenas o estado final em JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Verifica a saúde de todos os provedores configurados.
    Health,

    /// Mostra o grafo do fluxo e os provedores.
    Info,

    /// Executa um relato de exemplo contra o provedor mock.
    Demo,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_extract_text() {
        let cli = Cli::parse_from(["incident-extractor", "extract", "servidor caiu ontem"]);
        match cli.command {
            Command::Extract { text, file, json } => {
                assert_eq!(text.unwrap(), "servidor caiu ontem");
                assert!(file.is_none());
                assert!(!json);
            }
            _ => panic!("expected Extract command"),
        }
    }

    #[test]
    fn cli_parses_extract_file() {
        let cli = Cli::parse_from([
            "incident-extractor",
            "extract",
            "--file",
            "relato.txt",
            "--json",
        ]);
        match cli.command {
            Command::Extract { text, file, json } => {
                assert!(text.is_none());
                assert_eq!(file.unwrap(), PathBuf::from("relato.txt"));
                assert!(json);
            }
            _ => panic!("expected Extract command"),
        }
    }

    #[test]
    fn text_and_file_conflict() {
        let result = Cli::try_parse_from([
            "incident-extractor",
            "extract",
            "texto",
            "--file",
            "x.txt",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "incident-extractor",
            "--config",
            "custom.toml",
            "--timeout",
            "30",
            "--max-attempts",
            "5",
            "--verbose",
            "--json-logs",
            "demo",
        ]);
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.timeout, Some(30));
        assert_eq!(cli.max_attempts, Some(5));
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn zero_attempts_rejected() {
        let args = ["incident-extractor", "--max-attempts", "0", "info"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
