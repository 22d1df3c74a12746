use std::sync::Arc;

use regex::Regex;
use serde_json::json;
use tracing::{debug, info, warn};

use super::rules::RuleTable;
use crate::config::{GenerationSettings, NormalizerSettings};
use crate::fallback::FallbackInvoker;
use crate::llm::GenerateRequest;
use crate::state_machine::WorkflowState;

pub const NORMALIZER_SYSTEM_PROMPT: &str = "Você é um agente de pré-processamento de texto \
especializado em normalizar e limpar descrições de incidentes de TI em português. Sua função é \
padronizar o texto, corrigir erros óbvios e prepará-lo para extração de informações. Mantenha o \
contexto original e responda sempre em português brasileiro.";

const NORMALIZER_TEMPLATE: &str = "Normalize e limpe o seguinte texto sobre um incidente de TI, \
mantendo todas as informações importantes:\n\n\
Texto original:\n{text}\n\n\
Tarefas de normalização:\n\
1. Corrija erros de ortografia e gramática óbvios\n\
2. Padronize referências de data e hora (use formato claro)\n\
3. Expanda abreviações técnicas quando necessário\n\
4. Normalize nomes de locais\n\
5. Mantenha todos os detalhes factuais intactos\n\
6. Use português brasileiro padrão\n\n\
Texto normalizado:";

/// Termos que uma saída do modelo não pode perder.
const CRITICAL_TERMS: [&str; 6] = [
    "incidente",
    "falha",
    "sistema",
    "servidor",
    "erro",
    "problema",
];
const OUTAGE_TERMS: [&str; 4] = ["falha", "indisponível", "problema", "incidente"];
const RELATIVE_DAY_MARKERS: [&str; 3] = ["ontem (", "hoje (", "amanhã ("];

const PUNCTUATION_SIGNAL: usize = 10;
const WORD_SIGNAL: usize = 50;

/// Etapa de normalização: regras determinísticas e, para textos complexos,
/// uma passada opcional pelo modelo.
pub struct Normalizer {
    rules: Arc<dyn RuleTable>,
    invoker: Arc<FallbackInvoker>,
    settings: NormalizerSettings,
    generation: GenerationSettings,
    whitespace: Regex,
    punctuation: Regex,
    special_chars: Regex,
    leading_marks: Regex,
}

impl Normalizer {
    pub fn new(
        rules: Arc<dyn RuleTable>,
        invoker: Arc<FallbackInvoker>,
        settings: NormalizerSettings,
        generation: GenerationSettings,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            rules,
            invoker,
            settings,
            generation,
            whitespace: Regex::new(r"\s+")?,
            punctuation: Regex::new(r"[,.;!?]")?,
            special_chars: Regex::new(r"[^\w\s\-.,;!?():áàâãéèêíìîóòôõúùûç]")?,
            leading_marks: Regex::new(r"^[:\-\s]+")?,
        })
    }

    /// Preenche `normalized_text`. Nunca falha: problemas viram avisos e o
    /// texto das regras é usado como resultado.
    pub async fn execute(&self, state: &mut WorkflowState) {
        state.current_step = "pre_processamento".to_string();
        info!(
            stage = "normalizer",
            chars = state.raw_text.chars().count(),
            "starting normalization"
        );

        let mut text = state.raw_text.trim().to_string();
        let limit = self.settings.max_length;
        if text.chars().count() > limit {
            text = text.chars().take(limit).collect();
            state.add_warning(format!("Texto truncado para {limit} caracteres"));
        }

        let processed = self.rules.apply_rules(&text);
        let complexity = self.complexity_score(&processed);
        debug!(stage = "normalizer", complexity, "rules applied");

        let mut llm_used = false;
        let mut llm_accepted = false;
        let mut result = processed.clone();

        if self.settings.llm_enabled && complexity >= self.settings.complexity_threshold {
            llm_used = true;
            let prompt = NORMALIZER_TEMPLATE.replace("{text}", &processed);
            let request = GenerateRequest::new(prompt)
                .with_system_prompt(Some(NORMALIZER_SYSTEM_PROMPT.to_string()))
                .with_temperature(self.generation.temperature)
                .with_max_tokens(self.generation.max_tokens);

            match self.invoker.generate_with_fallback(&request).await {
                Ok(response) => {
                    let candidate = self.strip_preamble(&response.content);
                    if self.is_acceptable(&processed, &candidate) {
                        llm_accepted = true;
                        result = candidate;
                    } else {
                        warn!(
                            stage = "normalizer",
                            provider = %response.provider_id,
                            "model output rejected"
                        );
                        state.add_warning("Normalização pelo modelo descartada; usando regras");
                    }
                }
                Err(err) => {
                    warn!(stage = "normalizer", error = %err, "model normalization failed");
                    state.add_warning(format!("Normalização pelo modelo falhou: {err}"));
                }
            }
        }

        let normalized = self.finish(&result);
        let preprocessing = self.describe_changes(&text, &normalized);

        state.stage_outputs.insert(
            "normalizer".into(),
            json!({
                "original_length": state.raw_text.chars().count(),
                "processed_length": normalized.chars().count(),
                "preprocessing_applied": preprocessing,
                "complexity_score": complexity,
                "llm_used": llm_used,
                "llm_accepted": llm_accepted,
            }),
        );
        info!(
            stage = "normalizer",
            llm_used,
            llm_accepted,
            chars = normalized.chars().count(),
            "normalization finished"
        );
        state.normalized_text = Some(normalized);
    }

    /// Conta sinais de complexidade (0 a 5).
    pub fn complexity_score(&self, text: &str) -> usize {
        let lower = text.to_lowercase();
        [
            self.punctuation.find_iter(text).count() > PUNCTUATION_SIGNAL,
            text.split_whitespace().count() > WORD_SIGNAL,
            self.special_chars.is_match(&lower),
            lower.contains("erro") && lower.contains("sistema"),
            OUTAGE_TERMS.iter().any(|t| lower.contains(t)),
        ]
        .iter()
        .filter(|signal| **signal)
        .count()
    }

    /// Remove o cabeçalho que os modelos costumam repetir ("Texto normalizado:").
    fn strip_preamble(&self, output: &str) -> String {
        let lines: Vec<&str> = output.trim().lines().collect();
        let header = lines.iter().position(|line| {
            let lower = line.to_lowercase();
            lower.contains("texto") || lower.contains("normalizado") || line.contains(':')
        });
        let body = match header {
            Some(i) if i + 1 < lines.len() => lines[i + 1..].join(" "),
            Some(i) => lines[i]
                .split_once(':')
                .map(|(_, rest)| rest.to_string())
                .unwrap_or_default(),
            None => lines.join(" "),
        };
        let body = self.leading_marks.replace(body.trim(), "");
        self.whitespace.replace_all(&body, " ").trim().to_string()
    }

    fn is_acceptable(&self, original: &str, candidate: &str) -> bool {
        if candidate.is_empty() {
            return false;
        }
        let ratio = candidate.chars().count() as f64 / original.chars().count().max(1) as f64;
        if ratio < self.settings.min_length_ratio || ratio > self.settings.max_length_ratio {
            return false;
        }
        let original = original.to_lowercase();
        let candidate = candidate.to_lowercase();
        CRITICAL_TERMS
            .iter()
            .filter(|t| original.contains(*t))
            .all(|t| candidate.contains(t))
    }

    fn finish(&self, text: &str) -> String {
        let collapsed = self.whitespace.replace_all(text.trim(), " ").into_owned();
        if collapsed.is_empty() {
            return collapsed;
        }
        let mut out = collapsed;
        if !out.ends_with(['.', '!', '?']) {
            out.push('.');
        }
        let mut chars = out.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    fn describe_changes(&self, original: &str, normalized: &str) -> Vec<String> {
        let mut changes = Vec::new();
        if original.chars().count() != normalized.chars().count() {
            changes.push("length_changed".to_string());
        }
        let mut runs = self.whitespace.find_iter(original);
        if runs.any(|m| m.as_str() != " ") {
            changes.push("normalized_whitespace".to_string());
        }
        let lower = normalized.to_lowercase();
        if RELATIVE_DAY_MARKERS.iter().any(|w| lower.contains(w)) {
            changes.push("expanded_time_references".to_string());
        }
        changes.extend(self.rules.matched_terms(original, normalized));
        if changes.is_empty() {
            changes.push("minimal_changes".to_string());
        }
        changes
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::fallback::ProviderSlot;
    use crate::llm::{MockClient, ProviderError};
    use crate::resilience::{BreakerConfig, RetryConfig};
    use crate::stages::PortugueseRules;

    fn normalizer(mock: Arc<MockClient>, settings: NormalizerSettings) -> Normalizer {
        let rules = PortugueseRules::new()
            .unwrap()
            .with_reference_date(NaiveDate::from_ymd_opt(2025, 8, 24).unwrap());
        let slot = ProviderSlot::new(
            mock,
            BreakerConfig::default(),
            RetryConfig {
                max_attempts: 1,
                ..RetryConfig::default()
            },
        );
        Normalizer::new(
            Arc::new(rules),
            Arc::new(FallbackInvoker::new(vec![slot])),
            settings,
            GenerationSettings::default(),
        )
        .unwrap()
    }

    fn default_normalizer() -> Normalizer {
        let mock = Arc::new(MockClient::new("mock"));
        normalizer(mock, NormalizerSettings::default())
    }

    #[tokio::test]
    async fn simple_text_skips_the_model() {
        let mock = Arc::new(MockClient::new("mock"));
        let n = normalizer(mock.clone(), NormalizerSettings::default());
        let mut state = WorkflowState::new("  ontem às 14h o server   caiu em sp ", 3);

        n.execute(&mut state).await;

        assert_eq!(mock.calls(), 0);
        assert_eq!(
            state.normalized_text.as_deref(),
            Some("Ontem (2025-08-23) às 14:00 o servidor caiu em São Paulo.")
        );
        let out = &state.stage_outputs["normalizer"];
        assert_eq!(out["llm_used"], false);
        let applied = out["preprocessing_applied"].as_array().unwrap();
        assert!(applied.iter().any(|v| v == "expanded_time_references"));
        let term = r"technical_term: \bserver\b -> servidor";
        assert!(applied.iter().any(|v| v == term));
    }

    #[tokio::test]
    async fn complex_text_accepts_faithful_model_output() {
        let mock = Arc::new(MockClient::new("mock"));
        let reply = "Texto normalizado:\nFalha grave no sistema; erro no servidor de São Paulo!";
        mock.push_ok(reply);
        let n = normalizer(mock.clone(), NormalizerSettings::default());
        let mut state = WorkflowState::new("falha grave no sistema, erro no server de sp!", 3);

        n.execute(&mut state).await;

        assert_eq!(mock.calls(), 1);
        assert_eq!(
            state.normalized_text.as_deref(),
            Some("Falha grave no sistema; erro no servidor de São Paulo!")
        );
        assert_eq!(state.stage_outputs["normalizer"]["llm_accepted"], true);
        assert!(state.warnings.is_empty());
    }

    #[tokio::test]
    async fn model_output_dropping_critical_terms_is_rejected() {
        let mock = Arc::new(MockClient::new("mock"));
        let n = normalizer(mock, NormalizerSettings::default());
        let mut state = WorkflowState::new("falha grave no sistema, erro no servidor", 3);

        n.execute(&mut state).await;

        assert_eq!(
            state.normalized_text.as_deref(),
            Some("Falha grave no sistema, erro no servidor.")
        );
        assert_eq!(state.stage_outputs["normalizer"]["llm_accepted"], false);
        assert_eq!(state.warnings.len(), 1);
    }

    #[tokio::test]
    async fn model_failure_becomes_a_warning() {
        let mock = Arc::new(MockClient::new("mock"));
        mock.push_err(ProviderError::ModelNotFound {
            provider: "mock".into(),
            model: "x".into(),
        });
        let n = normalizer(mock, NormalizerSettings::default());
        let mut state = WorkflowState::new("incidente: falha no sistema com erro", 3);

        n.execute(&mut state).await;

        assert!(state.normalized_text.is_some());
        assert!(state.errors.is_empty());
        assert!(state.warnings[0].contains("falhou"));
    }

    #[tokio::test]
    async fn long_input_is_truncated_with_warning() {
        let mock = Arc::new(MockClient::new("mock"));
        let settings = NormalizerSettings {
            max_length: 20,
            llm_enabled: false,
            ..NormalizerSettings::default()
        };
        let n = normalizer(mock, settings);
        let mut state = WorkflowState::new("a".repeat(50), 3);

        n.execute(&mut state).await;

        assert_eq!(state.normalized_text.as_deref().map(str::len), Some(21));
        assert!(state.warnings[0].contains("truncado"));
    }

    #[test]
    fn complexity_signals() {
        let n = default_normalizer();
        assert_eq!(n.complexity_score("tudo certo"), 0);
        assert_eq!(n.complexity_score("erro no sistema"), 1);
        assert_eq!(n.complexity_score("falha: erro no sistema"), 2);
        assert_eq!(n.complexity_score("problema #42"), 2);
    }

    #[test]
    fn preamble_is_stripped() {
        let n = default_normalizer();
        let stripped = n.strip_preamble("Texto normalizado: - Falha no  servidor");
        assert_eq!(stripped, "Falha no servidor");
        assert_eq!(n.strip_preamble("Falha no servidor"), "Falha no servidor");
    }
}
