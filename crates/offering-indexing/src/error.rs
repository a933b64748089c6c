//! Error types for the indexing engine.

use thiserror::Error;

use offering_search::SearchError;
use offering_storage::StorageError;

/// Errors from projection, flushing and engine lifecycle.
#[derive(Debug, Error)]
pub enum IndexingError {
    /// Marker store failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Search store failure
    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    /// Change feed failure
    #[error("Feed error: {0}")]
    Feed(String),

    /// Engine started twice or used after shutdown
    #[error("Engine error: {0}")]
    Lifecycle(String),
}
