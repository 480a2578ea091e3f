use crate::types::BatchFailure;
use thiserror::Error;

pub type OptimizerResult<T> = Result<T, OptimizerError>;

#[derive(Error, Debug)]
pub enum OptimizerError {
    /// Event or configuration store unreachable or timed out.
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// No eligible creative, empty creative list and similar misconfiguration.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Malformed caller input, e.g. a negative conversion value.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Partial failure: {succeeded} succeeded, {} failed", .failures.len())]
    PartialFailure {
        succeeded: usize,
        failures: Vec<BatchFailure>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl OptimizerError {
    pub fn campaign_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "campaign",
            id: id.into(),
        }
    }

    pub fn creative_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: "creative",
            id: id.into(),
        }
    }

    pub fn is_data_unavailable(&self) -> bool {
        matches!(self, Self::DataUnavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<config::ConfigError> for OptimizerError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = OptimizerError::campaign_not_found("camp-1");
        assert_eq!(err.to_string(), "campaign not found: camp-1");
        assert!(err.is_not_found());

        let err = OptimizerError::PartialFailure {
            succeeded: 2,
            failures: vec![BatchFailure::new("cr-3", "timed out")],
        };
        assert_eq!(err.to_string(), "Partial failure: 2 succeeded, 1 failed");
        assert!(!err.is_data_unavailable());
    }
}
