// =============================================================================
// Engine error taxonomy
// =============================================================================
//
// Decision-gate layers never produce these — layers return structured
// {status, reason, metrics} values instead. Errors here flow across the
// orchestration, ingestion, and execution boundaries where the class of the
// failure decides the fallback behavior.
// =============================================================================

use thiserror::Error;

/// Classified engine failure.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Upstream market-data or context provider failed.
    #[error("provider error: {0}")]
    Provider(String),

    /// An analyzer computation failed.
    #[error("analyzer error: {0}")]
    Analyzer(String),

    /// Broker or market-rules failure on the execution path.
    #[error("execution error: {0}")]
    Execution(String),

    /// Malformed payload rejected at an ingestion seam.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl EngineError {
    /// Stable machine-readable class label used in audit records and
    /// API error payloads.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Provider(_) => "provider",
            Self::Analyzer(_) => "analyzer",
            Self::Execution(_) => "execution",
            Self::Validation(_) => "validation",
            Self::Unknown(_) => "unknown",
        }
    }

    /// Fold an arbitrary anyhow error into the taxonomy, best-effort.
    pub fn classify(err: anyhow::Error) -> Self {
        let msg = err.to_string();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("timeout") || lower.contains("connect") || lower.contains("fetch") {
            Self::Provider(msg)
        } else if lower.contains("broker") || lower.contains("order") {
            Self::Execution(msg)
        } else if lower.contains("invalid") || lower.contains("malformed") {
            Self::Validation(msg)
        } else {
            Self::Unknown(msg)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_labels_are_stable() {
        assert_eq!(EngineError::Provider("x".into()).class(), "provider");
        assert_eq!(EngineError::Execution("x".into()).class(), "execution");
        assert_eq!(EngineError::Validation("x".into()).class(), "validation");
    }

    #[test]
    fn classify_recognises_timeouts_as_provider() {
        let err = anyhow::anyhow!("request timeout after 5s");
        assert_eq!(EngineError::classify(err).class(), "provider");
    }

    #[test]
    fn classify_falls_back_to_unknown() {
        let err = anyhow::anyhow!("something odd");
        assert_eq!(EngineError::classify(err).class(), "unknown");
    }
}
