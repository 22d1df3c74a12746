//! Etapas do fluxo: normalização do texto e extração dos campos.

mod extractor;
mod normalizer;
mod rules;
mod strategy;

pub use extractor::{ExtractionResult, Extractor};
pub use normalizer::Normalizer;
pub use rules::{PortugueseRules, RuleTable};
