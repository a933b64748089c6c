//! Search store error types.

use thiserror::Error;

/// Failure of a single call to the search store.
///
/// The variant decides the disposition: transient errors and read-only
/// blocks are retried, permanent errors are reported as is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Timeout, refused connection, 429 or 5xx
    #[error("Transient store error: {0}")]
    Transient(String),

    /// Writes rejected because of the disk-pressure read-only block
    #[error("Index is read-only: {0}")]
    ReadOnlyBlock(String),

    /// Malformed document, mapping mismatch or other 4xx
    #[error("Store rejected request (status {status:?}): {reason}")]
    Permanent { status: Option<u16>, reason: String },
}

impl TransportError {
    /// Classify a store error response.
    pub fn classify(status: u16, error_type: &str, reason: &str) -> Self {
        let lowered = reason.to_ascii_lowercase();
        if error_type == "cluster_block_exception"
            && (lowered.contains("read-only") || lowered.contains("read_only"))
        {
            return TransportError::ReadOnlyBlock(reason.to_string());
        }
        if status == 429 || status >= 500 {
            return TransportError::Transient(format!("{} ({}): {}", error_type, status, reason));
        }
        TransportError::Permanent {
            status: Some(status),
            reason: format!("{}: {}", error_type, reason),
        }
    }

    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Permanent { .. })
    }

    pub fn is_read_only_block(&self) -> bool {
        matches!(self, TransportError::ReadOnlyBlock(_))
    }
}

/// Errors surfaced by [`BulkIndexClient`](crate::BulkIndexClient).
#[derive(Debug, Error)]
pub enum SearchError {
    /// Non-retryable store error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Retry budget spent
    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: TransportError,
    },

    /// Existing index has incompatible field mappings
    #[error("Mapping mismatch: {0}")]
    MappingMismatch(String),

    /// Client could not be constructed
    #[error("Invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_read_only_block() {
        let err = TransportError::classify(
            429,
            "cluster_block_exception",
            "index [offerings] blocked by: [TOO_MANY_REQUESTS/12/disk usage exceeded flood-stage watermark, index has read-only-allow-delete block];",
        );
        assert!(err.is_read_only_block());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_classify_transient_and_permanent() {
        assert!(matches!(
            TransportError::classify(503, "unavailable_shards_exception", "primary shard is not active"),
            TransportError::Transient(_)
        ));
        assert!(matches!(
            TransportError::classify(429, "es_rejected_execution_exception", "queue full"),
            TransportError::Transient(_)
        ));

        let err = TransportError::classify(400, "mapper_parsing_exception", "failed to parse field [days]");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("mapper_parsing_exception"));
    }

    #[test]
    fn test_search_error_display() {
        let err = SearchError::RetriesExhausted {
            operation: "upsert".to_string(),
            attempts: 10,
            last_error: TransportError::Transient("connection refused".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "upsert failed after 10 attempts: Transient store error: connection refused"
        );
    }
}
