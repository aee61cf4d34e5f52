//! Error types for the regime detection engine

use thiserror::Error;

/// Result type alias for this crate
pub type Result<T> = std::result::Result<T, RegimeError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum RegimeError {
    /// Malformed or insufficient input
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation needing a fitted model was called on an untrained one
    #[error("Model not trained: {0}")]
    NotTrained(String),

    /// EM fitting hit degenerate input
    #[error(
        "Numerical error: {message} (n_states={n_states}, n_samples={n_samples}, n_features={n_features})"
    )]
    Numerical {
        message: String,
        n_states: usize,
        n_samples: usize,
        n_features: usize,
    },

    /// Requested dataset is absent
    #[error("Dataset not found: {0}")]
    NotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV decoding error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration file could not be parsed
    #[error("Failed to parse config: {0}")]
    Config(#[from] toml::de::Error),
}

impl RegimeError {
    /// Shorthand for a numerical failure with the fit context attached
    pub fn numerical(
        message: impl Into<String>,
        n_states: usize,
        n_samples: usize,
        n_features: usize,
    ) -> Self {
        RegimeError::Numerical {
            message: message.into(),
            n_states,
            n_samples,
            n_features,
        }
    }

    /// Whether the caller can fix this by supplying different input
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            RegimeError::Validation(_) | RegimeError::NotFound(_) | RegimeError::Numerical { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numerical_display_carries_context() {
        let err = RegimeError::numerical("too few samples", 4, 3, 2);
        let msg = err.to_string();
        assert!(msg.contains("n_states=4"));
        assert!(msg.contains("n_samples=3"));
        assert!(msg.contains("n_features=2"));
    }

    #[test]
    fn test_input_error_classification() {
        assert!(RegimeError::Validation("x".into()).is_input_error());
        assert!(RegimeError::NotFound("x.csv".into()).is_input_error());
        assert!(!RegimeError::NotTrained("decode".into()).is_input_error());
    }
}
