use std::fmt;

use serde::{Deserialize, Serialize};

use super::state::WorkflowState;

/// Próximo passo escolhido pelo coordenador.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingDecision {
    Normalize,
    Extract,
    Retry,
    Finish,
    Abort,
}

impl fmt::Display for RoutingDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingDecision::Normalize => write!(f, "NORMALIZE"),
            RoutingDecision::Extract => write!(f, "EXTRACT"),
            RoutingDecision::Retry => write!(f, "RETRY"),
            RoutingDecision::Finish => write!(f, "FINISH"),
            RoutingDecision::Abort => write!(f, "ABORT"),
        }
    }
}

/// Decide o próximo passo a partir do estado, sem efeitos colaterais.
#[derive(Debug, Clone, Copy)]
pub struct Coordinator {
    pub max_errors: usize,
    pub max_missing_fields: usize,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self {
            max_errors: 3,
            max_missing_fields: 2,
        }
    }
}

impl Coordinator {
    pub fn new(max_errors: usize, max_missing_fields: usize) -> Self {
        Self {
            max_errors,
            max_missing_fields,
        }
    }

    /// Regras avaliadas em ordem; a primeira que casar vence.
    ///
    /// 1. Há erros e sobram tentativas → `Retry`
    /// 2. Mais de `max_errors` erros → `Abort`
    /// 3. Texto ainda não normalizado → `Normalize`
    /// 4. Nenhum campo extraído → `Extract`
    /// 5. Extração incompleta e sobram tentativas → `Retry`
    /// 6. Caso contrário → `Finish`
    pub fn decide(&self, state: &WorkflowState) -> RoutingDecision {
        if !state.errors.is_empty() && state.attempts_remain() {
            return RoutingDecision::Retry;
        }
        if state.errors.len() > self.max_errors {
            return RoutingDecision::Abort;
        }
        if state.normalized_text.is_none() {
            return RoutingDecision::Normalize;
        }
        let Some(fields) = &state.extracted_fields else {
            return RoutingDecision::Extract;
        };
        if fields.is_incomplete(self.max_missing_fields) && state.attempts_remain() {
            return RoutingDecision::Retry;
        }
        RoutingDecision::Finish
    }
}
