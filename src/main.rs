mod cli;
mod config;
mod error;
mod fallback;
mod llm;
mod logging;
mod orchestrator;
mod resilience;
mod stages;
mod state_machine;
mod ui;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use cli::{Cli, Command};
use config::ExtractorConfig;
use fallback::FallbackInvoker;
use orchestrator::WorkflowEngine;

const DEMO_TEXT: &str = "Ontem às 14h, no escritório de São Paulo, houve uma falha no servidor \
principal que afetou o sistema de faturamento por 2 horas.";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ExtractorConfig::from_path(path)?,
        None => ExtractorConfig::load()?,
    };
    if let Some(max_attempts) = cli.max_attempts {
        config.workflow.max_attempts = max_attempts;
    }
    if let Some(timeout) = cli.timeout {
        config.workflow.timeout_secs = timeout;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    if matches!(cli.command, Command::Demo) {
        config = config.with_mock_provider();
    }
    logging::init(&config.logging);

    let invoker = Arc::new(FallbackInvoker::from_config(&config)?);
    let engine = WorkflowEngine::new(&config, invoker.clone())?;

    match cli.command {
        Command::Extract { text, file, json } => {
            let text = match (text, file) {
                (Some(text), _) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                (None, None) => bail!("provide the incident text or --file <path>"),
            };
            if text.trim().is_empty() {
                bail!(error::ExtractorError::EmptyInput);
            }
            extract(&engine, &text, json).await;
        }
        Command::Health => {
            let health = invoker.health_check_all().await;
            ui::print_health(&health, &invoker.circuit_status());
        }
        Command::Info => {
            ui::print_info(&engine.get_workflow_info());
        }
        Command::Demo => {
            println!("{DEMO_TEXT}\n");
            extract(&engine, DEMO_TEXT, false).await;
        }
    }

    invoker.close_all().await;
    Ok(())
}

async fn extract(engine: &WorkflowEngine, text: &str, json_only: bool) {
    let limit: Duration = engine.default_timeout();
    if json_only {
        let state = engine.run_with_timeout(text, HashMap::new(), limit).await;
        ui::print_json(&state);
        return;
    }

    let progress = ui::RunProgress::start(text);
    let state = engine.run_with_timeout(text, HashMap::new(), limit).await;
    progress.complete(&state);
    println!();
    ui::print_json(&state);
}
