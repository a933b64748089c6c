//! Wire-level operations against the search store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use offering_types::SearchDocument;

use crate::error::TransportError;

/// Cluster health color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Green => write!(f, "green"),
            HealthStatus::Yellow => write!(f, "yellow"),
            HealthStatus::Red => write!(f, "red"),
        }
    }
}

/// Subset of the cluster health report the client acts on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterHealth {
    pub status: HealthStatus,
    #[serde(default)]
    pub active_shards: u32,
    #[serde(default)]
    pub unassigned_shards: u32,
}

impl ClusterHealth {
    pub fn has_unassigned_shards(&self) -> bool {
        self.unassigned_shards > 0
    }
}

/// Result of one document within a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemOutcome {
    pub id: String,
    pub result: Result<(), TransportError>,
}

impl BulkItemOutcome {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: Ok(()),
        }
    }

    pub fn failed(id: impl Into<String>, error: TransportError) -> Self {
        Self {
            id: id.into(),
            result: Err(error),
        }
    }
}

/// Operations the indexer needs from a search store.
///
/// Writes are create-or-update by document id. Implementations classify
/// failures into [`TransportError`] variants; they do not retry.
#[async_trait]
pub trait SearchTransport: Send + Sync {
    /// Whether the index exists.
    async fn index_exists(&self, index: &str) -> Result<bool, TransportError>;

    /// Field mappings of an existing index (the `properties` object).
    async fn get_mapping(&self, index: &str) -> Result<serde_json::Value, TransportError>;

    /// Create the index with the given body. Succeeds if it already exists.
    async fn create_index(
        &self,
        index: &str,
        body: &serde_json::Value,
    ) -> Result<(), TransportError>;

    /// Create or update a single document.
    async fn upsert(&self, index: &str, doc: &SearchDocument) -> Result<(), TransportError>;

    /// Create or update many documents in one request.
    ///
    /// `Err` means the request as a whole failed; per-document failures
    /// are reported in the returned outcomes.
    async fn bulk_upsert(
        &self,
        index: &str,
        docs: &[SearchDocument],
    ) -> Result<Vec<BulkItemOutcome>, TransportError>;

    /// Delete a document. Succeeds if it does not exist.
    async fn delete(&self, index: &str, id: &str) -> Result<(), TransportError>;

    /// Whether `index.blocks.read_only_allow_delete` is set.
    async fn read_only_block(&self, index: &str) -> Result<bool, TransportError>;

    /// Reset `index.blocks.read_only_allow_delete`.
    async fn clear_read_only_block(&self, index: &str) -> Result<(), TransportError>;

    async fn cluster_health(&self) -> Result<ClusterHealth, TransportError>;

    /// Ask the cluster to retry allocation of failed shards.
    async fn reroute_retry_failed(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cluster_health_parse() {
        let json = r#"{"cluster_name":"docker","status":"yellow","number_of_nodes":1,"active_shards":5,"unassigned_shards":2}"#;
        let health: ClusterHealth = serde_json::from_str(json).unwrap();
        assert_eq!(health.status, HealthStatus::Yellow);
        assert_eq!(health.active_shards, 5);
        assert!(health.has_unassigned_shards());
        assert_eq!(health.status.to_string(), "yellow");
    }
}
