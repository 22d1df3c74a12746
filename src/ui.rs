//! Saída de terminal: spinner durante a execução e resumo colorido do resultado.
//!
//! Usa `indicatif` para o spinner e `console` para as cores.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::fallback::ProviderHealth;
use crate::orchestrator::WorkflowInfo;
use crate::resilience::{CircuitState, CircuitStatus};
use crate::state_machine::{IncidentFields, ProcessingStatus, WorkflowState};

/// Spinner de uma execução do fluxo.
pub struct RunProgress {
    pb: ProgressBar,
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl RunProgress {
    pub fn start(text: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_message(format!("Extraindo: {}", preview(text, 60)));
        pb.enable_steady_tick(Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow().bold(),
            dim: Style::new().dim(),
        }
    }

    /// Para o spinner e imprime status, campos, avisos e erros.
    pub fn complete(&self, state: &WorkflowState) {
        self.pb.finish_and_clear();
        let (mark, style) = match state.status {
            ProcessingStatus::Success => ("✓", &self.green),
            ProcessingStatus::PartialSuccess => ("◐", &self.yellow),
            _ => ("✗", &self.red),
        };
        println!(
            "  {} {} em {} tentativa(s), {} ms",
            style.apply_to(mark),
            style.apply_to(state.status),
            state.attempt_count,
            state.processing_time_ms.unwrap_or_default()
        );

        if let Some(fields) = &state.extracted_fields {
            self.print_fields(fields);
        }
        for warning in &state.warnings {
            println!("  {} {warning}", self.yellow.apply_to("!"));
        }
        for error in &state.errors {
            println!("  {} {error}", self.red.apply_to("✗"));
        }
        if let Some(summary) = &state.summary {
            println!("  {}", self.dim.apply_to(&summary.final_message));
        }
    }

    fn print_fields(&self, fields: &IncidentFields) {
        let rows = [
            ("data_ocorrencia", &fields.occurrence_datetime),
            ("local", &fields.location),
            ("tipo_incidente", &fields.incident_type),
            ("impacto", &fields.impact),
        ];
        for (name, value) in rows {
            match value {
                Some(v) => println!("    {:<16} {v}", name),
                None => println!("    {:<16} {}", name, self.dim.apply_to("—")),
            }
        }
    }
}

fn preview(text: &str, max: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max {
        return flat;
    }
    let head: String = flat.chars().take(max).collect();
    format!("{head}…")
}

pub fn print_json<T: serde::Serialize>(value: &T) {
    let rendered = serde_json::to_string_pretty(value).unwrap_or_default();
    println!("{rendered}");
}

pub fn print_health(health: &[ProviderHealth], circuits: &[CircuitStatus]) {
    let green = Style::new().green().bold();
    let red = Style::new().red().bold();
    let yellow = Style::new().yellow();
    for report in health {
        let mark = if report.healthy {
            green.apply_to("✓")
        } else {
            red.apply_to("✗")
        };
        let circuit = circuits
            .iter()
            .find(|c| c.name == report.provider)
            .map(|c| match c.state {
                CircuitState::Closed => c.state.to_string(),
                _ => yellow.apply_to(c.state).to_string(),
            })
            .unwrap_or_default();
        println!("  {mark} {:<12} {circuit}", report.provider);
    }
}

pub fn print_info(info: &WorkflowInfo) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to("Fluxo"));
    println!("  entrada: {}", info.entry_point);
    for edge in &info.edges {
        match edge.condition {
            Some(cond) => println!("  {} → {} [{cond}]", edge.from, edge.to),
            None => println!("  {} → {}", edge.from, edge.to),
        }
    }
    println!("{}", bold.apply_to("Provedores"));
    for (i, provider) in info.providers.iter().enumerate() {
        println!("  {}. {provider}", i + 1);
    }
    println!("  tentativas máximas: {}", info.max_attempts);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_flattens_and_truncates() {
        assert_eq!(preview("falha\n no   servidor", 60), "falha no servidor");
        assert_eq!(preview("abcdefghij", 4), "abcd…");
    }
}
