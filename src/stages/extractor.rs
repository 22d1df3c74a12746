use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use super::strategy::{DateContext, EXTRACTOR_SYSTEM_PROMPT, ExtractionStrategy};
use crate::config::GenerationSettings;
use crate::fallback::FallbackInvoker;
use crate::llm::GenerateRequest;
use crate::state_machine::{IncidentFields, WorkflowState};

const REQUIRED_KEYS: [&str; 4] = ["data_ocorrencia", "local", "tipo_incidente", "impacto"];
const NULL_LIKE: [&str; 5] = ["", "null", "none", "n/a", "-"];

const MAX_LOCATION: usize = 200;
const MAX_INCIDENT_TYPE: usize = 150;
const MAX_IMPACT: usize = 500;

const EMBEDDED_DATETIME: &str = r"(\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4})\s+(\d{1,2}:\d{2})";

/// Resultado de uma tentativa de extração.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub success: bool,
    pub payload: Option<IncidentFields>,
    pub confidence: f64,
    pub elapsed_ms: u64,
    pub errors: Vec<String>,
    /// Provedor que atendeu a chamada, quando algum atendeu.
    pub provider_id: Option<String>,
    pub strategy: ExtractionStrategy,
    pub attempt: u32,
}

/// Campos limpos e o registro do que a validação alterou.
#[derive(Debug, Clone)]
pub struct FieldValidation {
    pub fields: IncidentFields,
    pub operations: Vec<String>,
    pub warnings: Vec<String>,
}

/// Etapa de extração: uma chamada ao modelo por tentativa.
pub struct Extractor {
    invoker: Arc<FallbackInvoker>,
    generation: GenerationSettings,
    whitespace: Regex,
    canonical_date: Regex,
    time_of_day: Regex,
    embedded_datetime: Regex,
    embedded_date: Regex,
    /// Data e hora fixas para os testes; `None` usa o relógio local.
    clock: Option<NaiveDateTime>,
}

impl Extractor {
    pub fn new(
        invoker: Arc<FallbackInvoker>,
        generation: GenerationSettings,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            invoker,
            generation,
            whitespace: Regex::new(r"\s+")?,
            canonical_date: Regex::new(r"^\d{4}-\d{2}-\d{2} \d{2}:\d{2}$")?,
            time_of_day: Regex::new(r"\b(\d{1,2})(?::(\d{2})|h(\d{2})?)")?,
            embedded_datetime: Regex::new(EMBEDDED_DATETIME)?,
            embedded_date: Regex::new(r"\d{4}-\d{2}-\d{2}|\d{1,2}/\d{1,2}/\d{4}")?,
            clock: None,
        })
    }

    #[cfg(test)]
    pub fn with_clock(mut self, now: NaiveDateTime) -> Self {
        self.clock = Some(now);
        self
    }

    fn dates(&self) -> DateContext {
        match self.clock {
            Some(now) => DateContext::new(now),
            None => DateContext::now_local(),
        }
    }

    /// Consome uma tentativa e atualiza o estado com o resultado.
    ///
    /// Sem payload (todos os provedores falharam ou a resposta não é JSON
    /// válido), um erro é registrado e os campos de tentativas anteriores são
    /// mantidos.
    pub async fn execute(&self, state: &mut WorkflowState) {
        state.current_step = "extracao".to_string();
        state.attempt_count += 1;
        let attempt = state.attempt_count;
        let strategy = ExtractionStrategy::for_attempt(attempt);
        info!(
            stage = "extractor",
            attempt,
            max_attempts = state.max_attempts,
            %strategy,
            "starting extraction"
        );

        let text = state
            .normalized_text
            .clone()
            .unwrap_or_else(|| state.raw_text.clone());
        let dates = self.dates();
        let prompt = strategy.build_prompt(&text, &dates);
        let request = GenerateRequest::new(prompt)
            .with_system_prompt(Some(EXTRACTOR_SYSTEM_PROMPT.to_string()))
            .with_temperature(self.generation.temperature)
            .with_max_tokens(self.generation.max_tokens);

        let started = Instant::now();
        let outcome = self.invoker.generate_with_fallback(&request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let (provider_id, parsed) = match outcome {
            Ok(response) => {
                let parsed = parse_response(&response.content)
                    .map_err(|reason| format!("Falha de parsing na resposta do modelo: {reason}"));
                (Some(response.provider_id), parsed)
            }
            Err(err) => {
                let message = format!("Extração falhou na tentativa {attempt}: {err}");
                (None, Err(message))
            }
        };

        let raw = match parsed {
            Ok(raw) => raw,
            Err(message) => {
                warn!(
                    stage = "extractor",
                    attempt,
                    error = %message,
                    "extraction produced no payload"
                );
                state.add_error(message.clone());
                state.stage_outputs.insert(
                    "extractor".into(),
                    json!({
                        "extraction_strategy": strategy,
                        "raw_extraction": Value::Null,
                        "validation_applied": ["validation_failed"],
                        "extraction_confidence": 0.0,
                        "attempt_number": attempt,
                        "provider_id": provider_id,
                    }),
                );
                state.extraction_results.push(ExtractionResult {
                    success: false,
                    payload: None,
                    confidence: 0.0,
                    elapsed_ms,
                    errors: vec![message],
                    provider_id,
                    strategy,
                    attempt,
                });
                return;
            }
        };

        let validation = self.validate_fields(&raw, &text, &dates);
        for w in &validation.warnings {
            state.add_warning(w.clone());
        }
        let fields = validation.fields;
        let confidence = fields.confidence();

        state.stage_outputs.insert(
            "extractor".into(),
            json!({
                "extraction_strategy": strategy,
                "raw_extraction": raw,
                "validation_applied": validation.operations,
                "extraction_confidence": confidence,
                "attempt_number": attempt,
                "provider_id": provider_id,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }),
        );

        info!(
            stage = "extractor",
            attempt,
            confidence,
            fields_extracted = fields.filled_count(),
            "extraction finished"
        );

        state.extraction_results.push(ExtractionResult {
            success: true,
            payload: Some(fields.clone()),
            confidence,
            elapsed_ms,
            errors: Vec::new(),
            provider_id,
            strategy,
            attempt,
        });
        // A última tentativa com payload vence, mesmo que traga menos campos.
        state.extracted_fields = Some(fields);
    }

    /// Limpa cada campo isoladamente; uma falha zera só aquele campo.
    pub fn validate_fields(
        &self,
        raw: &IncidentFields,
        source_text: &str,
        dates: &DateContext,
    ) -> FieldValidation {
        let mut operations = Vec::new();
        let mut warnings = Vec::new();

        let mut occurrence_datetime = None;
        if let Some(value) = raw.occurrence_datetime.as_deref() {
            occurrence_datetime = self.normalize_datetime(value, source_text, dates);
            match &occurrence_datetime {
                Some(normalized) if normalized != value => {
                    operations.push("date_enhanced".to_string());
                }
                Some(_) => {}
                None => {
                    warnings.push(format!("Data não reconhecida e descartada: '{value}'"));
                    operations.push("date_discarded".to_string());
                }
            }
        }

        let mut clean = |name: &str, value: &Option<String>, max: usize| {
            let cleaned = value.as_deref().and_then(|v| self.clean_text(v, max));
            if cleaned != *value {
                operations.push(format!("{name}_cleaned"));
            }
            cleaned
        };
        let location = clean("local", &raw.location, MAX_LOCATION);
        let incident_type = clean("tipo_incidente", &raw.incident_type, MAX_INCIDENT_TYPE);
        let impact = clean("impacto", &raw.impact, MAX_IMPACT);

        if operations.is_empty() {
            operations.push("no_changes_needed".to_string());
        }

        FieldValidation {
            fields: IncidentFields {
                occurrence_datetime,
                location,
                incident_type,
                impact,
            },
            operations,
            warnings,
        }
    }

    fn clean_text(&self, value: &str, max_chars: usize) -> Option<String> {
        let mut cleaned = self.whitespace.replace_all(value.trim(), " ").into_owned();
        for quote in ['"', '\''] {
            if cleaned.len() >= 2 && cleaned.starts_with(quote) && cleaned.ends_with(quote) {
                cleaned = cleaned[1..cleaned.len() - 1].trim().to_string();
            }
        }
        if NULL_LIKE.contains(&cleaned.to_lowercase().as_str()) {
            return None;
        }
        if cleaned.chars().count() > max_chars {
            let head: String = cleaned.chars().take(max_chars - 3).collect();
            cleaned = format!("{head}...");
        }
        Some(cleaned)
    }

    /// Normaliza a data para `YYYY-MM-DD HH:MM`. `None` quando não reconhecida.
    pub fn normalize_datetime(
        &self,
        value: &str,
        source_text: &str,
        dates: &DateContext,
    ) -> Option<String> {
        let value = value.trim();
        if NULL_LIKE.contains(&value.to_lowercase().as_str()) {
            return None;
        }
        if self.canonical_date.is_match(value) {
            return Some(value.to_string());
        }
        if let Some(dt) = parse_known_format(value) {
            return Some(dt.format("%Y-%m-%d %H:%M").to_string());
        }

        let lower = value.to_lowercase();
        let relative = if lower.contains("ontem") {
            Some(dates.yesterday())
        } else if lower.contains("hoje") {
            Some(dates.today())
        } else if lower.contains("amanhã") || lower.contains("amanha") {
            Some(dates.tomorrow())
        } else {
            None
        };
        if let Some(day) = relative {
            let (hour, minute) = self
                .time_in(value)
                .or_else(|| self.time_in(source_text))
                .unwrap_or((12, 0));
            return day
                .and_hms_opt(hour, minute, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string());
        }

        if let Some(caps) = self.embedded_datetime.captures(value) {
            let candidate = format!("{} {}", &caps[1], &caps[2]);
            if let Some(dt) = parse_known_format(&candidate) {
                return Some(dt.format("%Y-%m-%d %H:%M").to_string());
            }
        }
        self.embedded_date
            .find(value)
            .and_then(|m| parse_date_only(m.as_str()))
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
    }

    fn time_in(&self, text: &str) -> Option<(u32, u32)> {
        self.time_of_day.captures_iter(text).find_map(|caps| {
            let hour: u32 = caps.get(1)?.as_str().parse().ok()?;
            let minute: u32 = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().parse().ok())
                .unwrap_or(Some(0))?;
            (hour < 24 && minute < 60).then_some((hour, minute))
        })
    }
}

fn parse_known_format(value: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%d/%m/%Y %H:%M"];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .or_else(|| parse_date_only(value)?.and_hms_opt(12, 0, 0))
}

fn parse_date_only(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
}

/// Recorta do primeiro `{` ao último `}` e exige as quatro chaves esperadas.
/// Chaves extras são ignoradas.
pub fn parse_response(content: &str) -> Result<IncidentFields, String> {
    let start = content.find('{').ok_or("no JSON object in response")?;
    let end = content.rfind('}').ok_or("no JSON object in response")?;
    if end < start {
        return Err("no JSON object in response".to_string());
    }

    let object: Map<String, Value> = serde_json::from_str(&content[start..=end])
        .map_err(|e| format!("invalid JSON format: {e}"))?;

    let missing: Vec<&str> = REQUIRED_KEYS
        .iter()
        .copied()
        .filter(|k| !object.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(format!("schema mismatch, missing keys: {}", missing.join(", ")));
    }

    let field = |key: &str| match object.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    };
    Ok(IncidentFields {
        occurrence_datetime: field("data_ocorrencia"),
        location: field("local"),
        incident_type: field("tipo_incidente"),
        impact: field("impacto"),
    })
}
