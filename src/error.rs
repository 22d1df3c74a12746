use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Input text must not be empty")]
    EmptyInput,

    /// Falha do próprio motor (ex.: limite de iterações atingido).
    #[error("Workflow engine fault: {0}")]
    Engine(String),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ExtractorError::Config("no providers".into()).to_string(),
            "Config error: no providers"
        );
        assert_eq!(
            ExtractorError::Engine("iteration cap".into()).to_string(),
            "Workflow engine fault: iteration cap"
        );
    }

    #[test]
    fn regex_error_converts() {
        let unbalanced = String::from("(");
        let err: ExtractorError = regex::Regex::new(&unbalanced).unwrap_err().into();
        assert!(matches!(err, ExtractorError::Pattern(_)));
        assert!(err.to_string().starts_with("Invalid pattern: "));
    }
}
