use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::config::{ExtractorConfig, WorkflowSettings};
use crate::error::ExtractorError;
use crate::fallback::FallbackInvoker;
use crate::stages::{Extractor, Normalizer, PortugueseRules, RuleTable};
use crate::state_machine::{
    Coordinator, ProcessingStatus, ProcessingSummary, RoutingDecision, WorkflowState,
};

/// Nós do grafo do fluxo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Node {
    Coordinator,
    Normalizer,
    Extractor,
    ErrorHandler,
    Finalizer,
}

impl Node {
    const ALL: [Node; 5] = [
        Node::Coordinator,
        Node::Normalizer,
        Node::Extractor,
        Node::ErrorHandler,
        Node::Finalizer,
    ];

    fn as_str(self) -> &'static str {
        match self {
            Node::Coordinator => "coordinator",
            Node::Normalizer => "normalizer",
            Node::Extractor => "extractor",
            Node::ErrorHandler => "error_handler",
            Node::Finalizer => "finalizer",
        }
    }
}

/// Saída do tratador de erros.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recovery {
    /// Erros críticos demais: ERROR terminal, sem passar pelo finalizador.
    Terminate,
    /// Ainda há tentativas: volta ao extrator.
    RetryExtraction,
    Finalize,
}

/// Contagem de erros por classe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorAnalysis {
    pub critical: usize,
    pub recoverable: usize,
    pub unknown: usize,
}

/// Classifica os erros acumulados por palavras-chave e decide a recuperação.
#[derive(Debug, Clone)]
pub struct ErrorHandler {
    max_critical_errors: usize,
    critical_keywords: Vec<String>,
    recoverable_keywords: Vec<String>,
}

impl ErrorHandler {
    pub fn new(settings: &WorkflowSettings) -> Self {
        Self {
            max_critical_errors: settings.max_critical_errors,
            critical_keywords: lowercase(&settings.critical_keywords),
            recoverable_keywords: lowercase(&settings.recoverable_keywords),
        }
    }

    /// Palavras críticas têm precedência sobre as recuperáveis.
    pub fn analyze(&self, errors: &[String]) -> ErrorAnalysis {
        errors.iter().fold(ErrorAnalysis::default(), |mut acc, err| {
            let lower = err.to_lowercase();
            if mentions_any(&lower, &self.critical_keywords) {
                acc.critical += 1;
            } else if mentions_any(&lower, &self.recoverable_keywords) {
                acc.recoverable += 1;
            } else {
                acc.unknown += 1;
            }
            acc
        })
    }

    /// Dentro do [`WorkflowEngine`] o tratador só é alcançado com as
    /// tentativas esgotadas: a regra de retry do coordenador vem antes do
    /// `Abort`. Lá a decisão é sempre `Terminate` ou `Finalize`.
    pub fn decide(&self, analysis: &ErrorAnalysis, state: &WorkflowState) -> Recovery {
        if analysis.critical > self.max_critical_errors {
            Recovery::Terminate
        } else if state.attempts_remain() {
            Recovery::RetryExtraction
        } else {
            Recovery::Finalize
        }
    }

    pub fn handle(&self, state: &mut WorkflowState) -> Recovery {
        state.current_step = "tratamento_erro".to_string();
        let analysis = self.analyze(&state.errors);
        let recovery = self.decide(&analysis, state);
        info!(
            stage = "error_handler",
            critical = analysis.critical,
            recoverable = analysis.recoverable,
            unknown = analysis.unknown,
            ?recovery,
            "error analysis"
        );

        state.stage_outputs.insert(
            "error_handler".into(),
            json!({
                "recoverable_errors": analysis.recoverable,
                "critical_errors": analysis.critical,
                "unknown_errors": analysis.unknown,
                "decision": recovery,
            }),
        );

        match recovery {
            Recovery::Terminate => {
                state.add_error(format!(
                    "Recuperação impossível: {} erros críticos (limite {})",
                    analysis.critical, self.max_critical_errors
                ));
                state.status = ProcessingStatus::Error;
                state.current_step = "erro_critico".to_string();
                state.summary = Some(summarize(state));
            }
            Recovery::RetryExtraction => {
                state.add_warning(format!(
                    "Tentando recuperação: {} erros recuperáveis",
                    analysis.recoverable
                ));
            }
            Recovery::Finalize => {}
        }
        recovery
    }
}

fn lowercase(words: &[String]) -> Vec<String> {
    words.iter().map(|w| w.to_lowercase()).collect()
}

fn mentions_any(text: &str, keywords: &[String]) -> bool {
    keywords.iter().any(|k| text.contains(k.as_str()))
}

/// Define o status terminal e o resumo.
pub fn finalize(state: &mut WorkflowState, max_missing_fields: usize) {
    let incomplete = state
        .extracted_fields
        .as_ref()
        .map(|fields| fields.is_incomplete(max_missing_fields));
    match incomplete {
        Some(false) => {
            state.status = ProcessingStatus::Success;
            state.current_step = "concluido".to_string();
        }
        Some(true) => {
            state.status = ProcessingStatus::PartialSuccess;
            state.current_step = "concluido_parcial".to_string();
            state.add_warning("Extração parcialmente bem-sucedida");
        }
        None => {
            state.status = ProcessingStatus::Error;
            state.current_step = "erro".to_string();
            state.add_error("Não foi possível extrair informações do incidente");
        }
    }
    state.summary = Some(summarize(state));
    info!(
        stage = "finalizer",
        status = %state.status,
        attempts = state.attempt_count,
        "processing finalized"
    );
}

fn summarize(state: &WorkflowState) -> ProcessingSummary {
    let completion_rate = state.confidence();
    let (success_rate, final_message) = match state.status {
        ProcessingStatus::Success => (1.0, "Processamento concluído com sucesso"),
        ProcessingStatus::PartialSuccess => (0.5, "Processamento parcialmente concluído"),
        _ => (0.0, "Processamento finalizado com erro"),
    };
    let mut final_message = final_message.to_string();
    if state.status == ProcessingStatus::PartialSuccess {
        let percent = completion_rate * 100.0;
        final_message.push_str(&format!(" ({percent:.0}% dos campos extraídos)"));
    }
    ProcessingSummary {
        total_attempts: state.attempt_count,
        errors_count: state.errors.len(),
        warnings_count: state.warnings.len(),
        completion_rate,
        success_rate,
        final_message,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowEdge {
    pub from: &'static str,
    pub to: &'static str,
    /// Decisão do coordenador que ativa a aresta, quando houver.
    pub condition: Option<&'static str>,
}

/// Descrição estática do grafo, para diagnóstico.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowInfo {
    pub workflow_type: &'static str,
    pub entry_point: &'static str,
    pub nodes: Vec<&'static str>,
    pub edges: Vec<WorkflowEdge>,
    pub agents: Vec<&'static str>,
    pub features: Vec<&'static str>,
    pub supported_languages: Vec<&'static str>,
    pub output_format: BTreeMap<&'static str, &'static str>,
    pub providers: Vec<String>,
    pub max_attempts: u32,
}

/// Motor do fluxo de extração.
///
/// Construído uma vez por processo; cada chamada a [`WorkflowEngine::run`]
/// cria o próprio [`WorkflowState`], então execuções concorrentes só
/// compartilham o invocador (e os breakers dele).
pub struct WorkflowEngine {
    settings: WorkflowSettings,
    coordinator: Coordinator,
    normalizer: Normalizer,
    extractor: Extractor,
    error_handler: ErrorHandler,
    invoker: Arc<FallbackInvoker>,
}

impl WorkflowEngine {
    pub fn new(
        config: &ExtractorConfig,
        invoker: Arc<FallbackInvoker>,
    ) -> Result<Self, ExtractorError> {
        let rules = Arc::new(PortugueseRules::new()?);
        Self::with_rules(config, invoker, rules)
    }

    pub fn with_rules(
        config: &ExtractorConfig,
        invoker: Arc<FallbackInvoker>,
        rules: Arc<dyn RuleTable>,
    ) -> Result<Self, ExtractorError> {
        let settings = config.workflow.clone();
        if settings.max_attempts == 0 {
            let message = "workflow.max_attempts must be at least 1";
            return Err(ExtractorError::Config(message.into()));
        }
        Ok(Self {
            coordinator: Coordinator::new(settings.max_errors, settings.max_missing_fields),
            normalizer: Normalizer::new(
                rules,
                invoker.clone(),
                config.normalizer.clone(),
                config.generation.clone(),
            )?,
            extractor: Extractor::new(invoker.clone(), config.generation.clone())?,
            error_handler: ErrorHandler::new(&settings),
            invoker,
            settings,
        })
    }

    /// Tempo limite configurado para [`WorkflowEngine::run_with_timeout`].
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs)
    }

    /// Executa o fluxo até um status terminal. Falhas das etapas ficam em
    /// `errors`/`warnings` do estado devolvido.
    pub async fn run(&self, raw_text: &str, options: HashMap<String, Value>) -> WorkflowState {
        let started = Instant::now();
        let mut state = self.new_state(raw_text, options);
        info!(
            stage = "workflow",
            run_id = %state.run_id,
            text_length = raw_text.chars().count(),
            "starting incident extraction"
        );

        if raw_text.trim().is_empty() {
            state.add_error(ExtractorError::EmptyInput.to_string());
            state.status = ProcessingStatus::Error;
            state.current_step = "erro_critico".to_string();
        } else {
            state.status = ProcessingStatus::Processing;
            self.drive(&mut state).await;
        }
        debug_assert!(state.status.is_terminal());

        state.processing_time_ms = Some(started.elapsed().as_millis() as u64);
        info!(
            stage = "workflow",
            run_id = %state.run_id,
            status = %state.status,
            attempts = state.attempt_count,
            errors = state.errors.len(),
            warnings = state.warnings.len(),
            elapsed_ms = state.processing_time_ms,
            "incident extraction finished"
        );
        state
    }

    fn new_state(&self, raw_text: &str, options: HashMap<String, Value>) -> WorkflowState {
        WorkflowState::new(raw_text, self.settings.max_attempts).with_options(options)
    }

    /// Como [`WorkflowEngine::run`], abandonando a execução após `timeout`.
    /// A chamada em andamento é descartada, não interrompida no meio de um
    /// passo síncrono.
    pub async fn run_with_timeout(
        &self,
        raw_text: &str,
        options: HashMap<String, Value>,
        timeout: Duration,
    ) -> WorkflowState {
        let run = self.run(raw_text, options.clone());
        match tokio::time::timeout(timeout, run).await {
            Ok(state) => state,
            Err(_) => {
                let timeout_secs = timeout.as_secs_f64();
                error!(stage = "workflow", timeout_secs, "workflow timed out");
                let mut state = self.new_state(raw_text, options);
                state.status = ProcessingStatus::Error;
                state.current_step = "timeout".to_string();
                state.add_error(format!(
                    "Tempo limite excedido após {timeout_secs:.1} segundos (timeout)"
                ));
                state.processing_time_ms = Some(timeout.as_millis() as u64);
                state.summary = Some(summarize(&state));
                state
            }
        }
    }

    async fn drive(&self, state: &mut WorkflowState) {
        let mut node = Node::Coordinator;
        let mut steps = 0u32;
        loop {
            steps += 1;
            if steps > self.settings.iteration_cap {
                let node = node.as_str();
                error!(stage = "workflow", steps, node, "iteration cap reached");
                let cap = self.settings.iteration_cap;
                let fault = ExtractorError::Engine(format!(
                    "limite de {cap} passos atingido em '{node}'"
                ));
                state.add_error(fault.to_string());
                state.status = ProcessingStatus::Error;
                state.current_step = "erro_critico".to_string();
                state.summary = Some(summarize(state));
                return;
            }

            node = match node {
                Node::Coordinator => self.route(state),
                Node::Normalizer => {
                    self.normalizer.execute(state).await;
                    Node::Coordinator
                }
                Node::Extractor => {
                    self.extractor.execute(state).await;
                    self.note_incomplete(state);
                    Node::Coordinator
                }
                // Só alcançado com tentativas esgotadas; `RetryExtraction`
                // fica para quem usa o tratador fora do motor.
                Node::ErrorHandler => match self.error_handler.handle(state) {
                    Recovery::Terminate => return,
                    Recovery::RetryExtraction => Node::Extractor,
                    Recovery::Finalize => Node::Finalizer,
                },
                Node::Finalizer => {
                    finalize(state, self.settings.max_missing_fields);
                    return;
                }
            };
        }
    }

    fn route(&self, state: &mut WorkflowState) -> Node {
        state.current_step = "supervisao".to_string();
        let decision = self.coordinator.decide(state);
        let exhausted = !state.attempts_remain();
        let next = match decision {
            RoutingDecision::Normalize => Node::Normalizer,
            RoutingDecision::Extract | RoutingDecision::Retry if exhausted => Node::ErrorHandler,
            RoutingDecision::Extract | RoutingDecision::Retry => Node::Extractor,
            RoutingDecision::Finish => Node::Finalizer,
            RoutingDecision::Abort => Node::ErrorHandler,
        };
        info!(
            stage = "coordinator",
            %decision,
            next = next.as_str(),
            attempt = state.attempt_count,
            errors = state.errors.len(),
            "routing decision"
        );
        state.stage_outputs.insert(
            "coordinator".into(),
            json!({
                "decision": decision,
                "next_node": next.as_str(),
                "attempt_count": state.attempt_count,
            }),
        );
        next
    }

    fn note_incomplete(&self, state: &mut WorkflowState) {
        let incomplete = state
            .extracted_fields
            .as_ref()
            .is_some_and(|f| f.is_incomplete(self.settings.max_missing_fields));
        if !incomplete {
            return;
        }
        let attempt = state.attempt_count;
        if state.attempts_remain() {
            warn!(
                stage = "extractor",
                attempt,
                "incomplete extraction, retrying"
            );
            state.add_warning("Extração incompleta, tentando novamente");
        } else {
            warn!(
                stage = "extractor",
                attempt,
                "incomplete extraction, attempts exhausted"
            );
            state.add_warning("Extração incompleta, máximo de tentativas atingido");
        }
    }

    pub fn get_workflow_info(&self) -> WorkflowInfo {
        let edge = |from: Node, to: Node, condition: Option<&'static str>| WorkflowEdge {
            from: from.as_str(),
            to: to.as_str(),
            condition,
        };
        WorkflowInfo {
            workflow_type: "incident_extraction",
            entry_point: Node::Coordinator.as_str(),
            nodes: Node::ALL.iter().map(|n| n.as_str()).collect(),
            edges: vec![
                edge(Node::Coordinator, Node::Normalizer, Some("NORMALIZE")),
                edge(Node::Coordinator, Node::Extractor, Some("EXTRACT")),
                edge(Node::Coordinator, Node::Extractor, Some("RETRY")),
                edge(Node::Coordinator, Node::ErrorHandler, Some("ABORT")),
                edge(Node::Coordinator, Node::Finalizer, Some("FINISH")),
                edge(Node::Normalizer, Node::Coordinator, None),
                edge(Node::Extractor, Node::Coordinator, None),
                edge(Node::ErrorHandler, Node::Finalizer, Some("finalize")),
            ],
            agents: vec!["coordinator", "normalizer", "extractor"],
            features: vec![
                "multi_agent_coordination",
                "error_recovery",
                "retry_logic",
                "circuit_breaker",
                "provider_fallback",
                "conditional_routing",
            ],
            supported_languages: vec!["portuguese"],
            output_format: BTreeMap::from([
                ("data_ocorrencia", "YYYY-MM-DD HH:MM"),
                ("local", "string"),
                ("tipo_incidente", "string"),
                ("impacto", "string"),
            ]),
            providers: self.invoker.provider_names(),
            max_attempts: self.settings.max_attempts,
        }
    }
}
