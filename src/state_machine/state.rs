use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::stages::ExtractionResult;

/// Status de uma execução. `Success`, `PartialSuccess` e `Error` são terminais.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Success,
    Error,
    PartialSuccess,
}

impl ProcessingStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::Success | ProcessingStatus::PartialSuccess | ProcessingStatus::Error
        )
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "PENDING"),
            ProcessingStatus::Processing => write!(f, "PROCESSING"),
            ProcessingStatus::Success => write!(f, "SUCCESS"),
            ProcessingStatus::Error => write!(f, "ERROR"),
            ProcessingStatus::PartialSuccess => write!(f, "PARTIAL_SUCCESS"),
        }
    }
}

/// Os quatro campos extraídos de um relato de incidente.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentFields {
    /// `YYYY-MM-DD HH:MM`.
    #[serde(rename = "data_ocorrencia")]
    pub occurrence_datetime: Option<String>,
    #[serde(rename = "local")]
    pub location: Option<String>,
    #[serde(rename = "tipo_incidente")]
    pub incident_type: Option<String>,
    #[serde(rename = "impacto")]
    pub impact: Option<String>,
}

impl IncidentFields {
    pub const FIELD_COUNT: usize = 4;

    pub fn filled_count(&self) -> usize {
        [
            &self.occurrence_datetime,
            &self.location,
            &self.incident_type,
            &self.impact,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn missing_count(&self) -> usize {
        Self::FIELD_COUNT - self.filled_count()
    }

    /// Incompleta quando faltam mais que `max_missing` campos.
    pub fn is_incomplete(&self, max_missing: usize) -> bool {
        self.missing_count() > max_missing
    }

    /// Fração de campos preenchidos, em [0, 1].
    pub fn confidence(&self) -> f64 {
        self.filled_count() as f64 / Self::FIELD_COUNT as f64
    }
}

/// Resumo produzido pelo finalizador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingSummary {
    pub total_attempts: u32,
    pub errors_count: usize,
    pub warnings_count: usize,
    /// Fração de campos preenchidos no resultado final.
    pub completion_rate: f64,
    /// 1.0 para SUCCESS, 0.5 para PARTIAL_SUCCESS, 0.0 para ERROR.
    pub success_rate: f64,
    pub final_message: String,
}

/// Estado de uma execução do fluxo. Pertence exclusivamente a uma chamada de
/// `run` e é descartado depois que o status terminal é devolvido.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: String,
    pub raw_text: String,
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
    pub normalized_text: Option<String>,
    pub extracted_fields: Option<IncidentFields>,
    pub status: ProcessingStatus,
    pub current_step: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Saída de diagnóstico por etapa ("normalizer", "extractor", ...).
    pub stage_outputs: BTreeMap<String, serde_json::Value>,
    pub extraction_results: Vec<ExtractionResult>,
    pub start_timestamp: DateTime<Utc>,
    pub processing_time_ms: Option<u64>,
    pub summary: Option<ProcessingSummary>,
}

impl WorkflowState {
    pub fn new(raw_text: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            raw_text: raw_text.into(),
            options: HashMap::new(),
            normalized_text: None,
            extracted_fields: None,
            status: ProcessingStatus::Pending,
            current_step: "inicio".to_string(),
            attempt_count: 0,
            max_attempts,
            errors: Vec::new(),
            warnings: Vec::new(),
            stage_outputs: BTreeMap::new(),
            extraction_results: Vec::new(),
            start_timestamp: Utc::now(),
            processing_time_ms: None,
            summary: None,
        }
    }

    pub fn with_options(mut self, options: HashMap<String, serde_json::Value>) -> Self {
        self.options = options;
        self
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn attempts_remain(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Confiança do último resultado de extração com payload.
    pub fn confidence(&self) -> f64 {
        self.extracted_fields
            .as_ref()
            .map(IncidentFields::confidence)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(n: usize) -> IncidentFields {
        let v = |i: usize| (i < n).then(|| format!("campo {i}"));
        IncidentFields {
            occurrence_datetime: v(0),
            location: v(1),
            incident_type: v(2),
            impact: v(3),
        }
    }

    #[test]
    fn incomplete_threshold() {
        assert!(fields(0).is_incomplete(2));
        assert!(fields(1).is_incomplete(2));
        assert!(!fields(2).is_incomplete(2));
        assert!(!fields(4).is_incomplete(2));
        assert_eq!(fields(3).confidence(), 0.75);
    }

    #[test]
    fn fields_serialize_with_portuguese_keys() {
        let json = serde_json::to_value(fields(4)).unwrap();
        assert_eq!(json["data_ocorrencia"], "campo 0");
        assert_eq!(json["local"], "campo 1");
        assert_eq!(json["tipo_incidente"], "campo 2");
        assert_eq!(json["impacto"], "campo 3");
    }

    #[test]
    fn new_state_defaults() {
        let state = WorkflowState::new("texto", 3);
        assert_eq!(state.status, ProcessingStatus::Pending);
        assert_eq!(state.attempt_count, 0);
        assert!(state.attempts_remain());
        assert!(!state.status.is_terminal());
        assert_eq!(state.confidence(), 0.0);
        assert!(Uuid::parse_str(&state.run_id).is_ok());
    }

    #[test]
    fn status_display_and_serde_agree() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::PartialSuccess,
            ProcessingStatus::Error,
        ] {
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{status}\""));
        }
    }
}
