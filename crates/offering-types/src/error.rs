//! Error types for the offering indexer.

use thiserror::Error;

/// Unified error type for domain and configuration operations.
#[derive(Debug, Error)]
pub enum OfferingError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input error
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OfferingError::Config("missing url".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing url");

        let err = OfferingError::InvalidInput("empty course code".to_string());
        assert_eq!(err.to_string(), "Invalid input: empty course code");
    }
}
