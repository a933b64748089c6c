//! Search store client with retry and remediation.
//!
//! Write path:
//! 1. Single upserts retry transient failures with doubling delays
//! 2. Bulk upserts retry only the documents that failed transiently
//! 3. A read-only block triggers one remediation attempt per operation
//! 4. Bulk operations inspect cluster health before and after

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use offering_types::{SearchDocument, Settings};

use crate::elasticsearch::ElasticsearchTransport;
use crate::error::{SearchError, TransportError};
use crate::mapping::{index_mapping, mapping_mismatches};
use crate::retry::RetryPolicy;
use crate::transport::{ClusterHealth, SearchTransport};

/// A document the store did not accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemError {
    pub id: String,
    pub reason: String,
}

/// Itemized outcome of [`BulkIndexClient::upsert_many`].
#[derive(Debug, Clone, Default)]
pub struct BulkIndexResult {
    /// Whether the store accepted at least one request
    pub submitted: bool,
    /// Ids written successfully
    pub succeeded: Vec<String>,
    /// Ids not written, with the last failure reason
    pub failed: Vec<BulkItemError>,
    /// Bulk requests issued
    pub attempts: u32,
    /// Read-only remediation ran
    pub remediated: bool,
    pub elapsed: Duration,
}

impl BulkIndexResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Outcome of a read-only remediation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// The index was not blocked
    NotNeeded,
    /// The block was cleared
    Cleared,
    /// The block could not be inspected or cleared
    Failed,
}

/// Writes search documents to one index.
pub struct BulkIndexClient {
    transport: Arc<dyn SearchTransport>,
    index: String,
    policy: RetryPolicy,
}

impl BulkIndexClient {
    pub fn new(transport: Arc<dyn SearchTransport>, index: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            index: index.into(),
            policy,
        }
    }

    /// Client over HTTP, configured from settings.
    pub fn from_settings(settings: &Settings) -> Result<Self, SearchError> {
        let transport = ElasticsearchTransport::from_settings(&settings.search)?;
        Ok(Self::new(
            Arc::new(transport),
            settings.search.index.clone(),
            RetryPolicy::from_settings(&settings.retry),
        ))
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Ensure the index exists with the expected field mappings.
    ///
    /// An existing index with matching mappings is left alone.
    pub async fn initialize(&self) -> Result<(), SearchError> {
        let index = self.index.as_str();
        let exists = self
            .policy
            .run("index_exists", |_| self.transport.index_exists(index))
            .await?;

        if exists {
            let properties = self
                .policy
                .run("get_mapping", |_| self.transport.get_mapping(index))
                .await?;
            let mismatches = mapping_mismatches(&properties);
            if !mismatches.is_empty() {
                error!(index, ?mismatches, "Existing index has incompatible mappings");
                return Err(SearchError::MappingMismatch(mismatches.join("; ")));
            }
            info!(index, "Search index already exists");
            return Ok(());
        }

        let body = index_mapping();
        self.policy
            .run("create_index", |_| self.transport.create_index(index, &body))
            .await?;
        info!(index, "Created search index");
        Ok(())
    }

    /// Create or update one document.
    pub async fn upsert_one(&self, doc: &SearchDocument) -> Result<(), SearchError> {
        let mut backoff = self.policy.backoff();
        let mut remediated = false;
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match self.transport.upsert(&self.index, doc).await {
                Ok(()) => {
                    debug!(id = %doc.id, attempt, "Upserted document");
                    return Ok(());
                }
                Err(e) if !e.is_retryable() => {
                    error!(id = %doc.id, error = %e, "Document rejected");
                    return Err(SearchError::Transport(e));
                }
                Err(e) => e,
            };

            if err.is_read_only_block() && !remediated {
                remediated = true;
                self.remediate_read_only().await;
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        id = %doc.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Upsert failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(id = %doc.id, attempts = attempt, error = %err, "Upsert failed, giving up");
                    return Err(SearchError::RetriesExhausted {
                        operation: "upsert".to_string(),
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }

    /// Create or update many documents, reporting per-document results.
    ///
    /// Each retry resubmits only documents whose last failure was
    /// transient. Never fails as a whole; failures are itemized.
    pub async fn upsert_many(&self, docs: &[SearchDocument]) -> BulkIndexResult {
        let start = Instant::now();
        let mut result = BulkIndexResult::default();
        if docs.is_empty() {
            return result;
        }

        info!(index = %self.index, documents = docs.len(), "Starting bulk index");
        self.inspect_health("before bulk").await;

        let mut pending: Vec<SearchDocument> = docs.to_vec();
        let mut last_errors: HashMap<String, TransportError> = HashMap::new();
        let mut backoff = self.policy.backoff();

        loop {
            result.attempts += 1;
            let mut saw_block = false;

            match self.transport.bulk_upsert(&self.index, &pending).await {
                Ok(outcomes) => {
                    result.submitted = true;
                    let mut by_id: HashMap<String, Result<(), TransportError>> = outcomes
                        .into_iter()
                        .map(|o| (o.id, o.result))
                        .collect();
                    let mut retry = Vec::new();

                    for doc in pending.drain(..) {
                        let outcome = by_id.remove(&doc.id).unwrap_or_else(|| {
                            Err(TransportError::Transient("no result for document".to_string()))
                        });
                        match outcome {
                            Ok(()) => {
                                last_errors.remove(&doc.id);
                                result.succeeded.push(doc.id);
                            }
                            Err(e) if !e.is_retryable() => {
                                warn!(id = %doc.id, error = %e, "Document rejected");
                                last_errors.remove(&doc.id);
                                result.failed.push(BulkItemError {
                                    id: doc.id,
                                    reason: e.to_string(),
                                });
                            }
                            Err(e) => {
                                saw_block |= e.is_read_only_block();
                                last_errors.insert(doc.id.clone(), e);
                                retry.push(doc);
                            }
                        }
                    }
                    pending = retry;
                }
                Err(e) if !e.is_retryable() => {
                    error!(index = %self.index, error = %e, "Bulk request rejected");
                    for doc in pending.drain(..) {
                        result.failed.push(BulkItemError {
                            id: doc.id,
                            reason: e.to_string(),
                        });
                    }
                }
                Err(e) => {
                    saw_block = e.is_read_only_block();
                    for doc in &pending {
                        last_errors.insert(doc.id.clone(), e.clone());
                    }
                }
            }

            if pending.is_empty() {
                break;
            }

            if saw_block && !result.remediated {
                result.remediated = true;
                self.remediate_read_only().await;
            }

            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        attempt = result.attempts,
                        remaining = pending.len(),
                        delay_ms = delay.as_millis() as u64,
                        "Bulk index incomplete, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                None => {
                    error!(
                        attempts = result.attempts,
                        remaining = pending.len(),
                        "Bulk index retries exhausted"
                    );
                    break;
                }
            }
        }

        for doc in pending {
            let reason = last_errors
                .remove(&doc.id)
                .map(|e| e.to_string())
                .unwrap_or_else(|| "retries exhausted".to_string());
            result.failed.push(BulkItemError { id: doc.id, reason });
        }

        self.inspect_health("after bulk").await;

        result.elapsed = start.elapsed();
        info!(
            index = %self.index,
            attempted = docs.len(),
            succeeded = result.succeeded.len(),
            failed = result.failed.len(),
            attempts = result.attempts,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Bulk index complete"
        );
        for item in &result.failed {
            warn!(id = %item.id, reason = %item.reason, "Document not indexed");
        }
        result
    }

    /// Delete one document. A missing document counts as deleted.
    pub async fn delete_one(&self, id: &str) -> Result<(), SearchError> {
        let index = self.index.as_str();
        self.policy
            .run("delete", |_| self.transport.delete(index, id))
            .await?;
        debug!(id, "Deleted document");
        Ok(())
    }

    /// Clear the disk-pressure read-only block if it is set.
    pub async fn remediate_read_only(&self) -> Remediation {
        match self.transport.read_only_block(&self.index).await {
            Ok(false) => {
                debug!(index = %self.index, "Index is not read-only");
                Remediation::NotNeeded
            }
            Ok(true) => {
                warn!(index = %self.index, "Index is read-only, clearing block");
                self.log_health().await;
                match self.transport.clear_read_only_block(&self.index).await {
                    Ok(()) => {
                        info!(index = %self.index, "Cleared read-only block");
                        Remediation::Cleared
                    }
                    Err(e) => {
                        error!(index = %self.index, error = %e, "Failed to clear read-only block");
                        Remediation::Failed
                    }
                }
            }
            Err(e) => {
                error!(index = %self.index, error = %e, "Failed to read index settings");
                Remediation::Failed
            }
        }
    }

    /// Current cluster health, or `None` if it could not be read.
    pub async fn cluster_health(&self) -> Option<ClusterHealth> {
        match self.transport.cluster_health().await {
            Ok(health) => Some(health),
            Err(e) => {
                warn!(error = %e, "Failed to read cluster health");
                None
            }
        }
    }

    async fn log_health(&self) -> Option<ClusterHealth> {
        let health = self.cluster_health().await?;
        info!(
            status = %health.status,
            active_shards = health.active_shards,
            unassigned_shards = health.unassigned_shards,
            "Cluster health"
        );
        Some(health)
    }

    /// Log health and ask for reallocation of unassigned shards.
    pub async fn inspect_health(&self, stage: &str) -> Option<ClusterHealth> {
        debug!(stage, "Inspecting cluster health");
        let health = self.log_health().await?;
        if health.has_unassigned_shards() {
            warn!(
                stage,
                unassigned_shards = health.unassigned_shards,
                "Unassigned shards, requesting reroute"
            );
            match self.transport.reroute_retry_failed().await {
                Ok(()) => info!("Requested shard reallocation"),
                Err(e) => warn!(error = %e, "Shard reallocation request failed"),
            }
        }
        Some(health)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CallCounts, MockTransport};
    use serde_json::json;

    fn doc(id: &str) -> SearchDocument {
        SearchDocument {
            id: id.to_string(),
            course_code: "CS 101".to_string(),
            course_name: "Intro".to_string(),
            days: "TBA".to_string(),
            time: "TBA".to_string(),
            instructor: "TBA".to_string(),
            location: "TBA".to_string(),
        }
    }

    fn client(mock: Arc<MockTransport>, attempts: u32) -> BulkIndexClient {
        BulkIndexClient::new(mock, "offerings", RetryPolicy::new(attempts, Duration::from_millis(200)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_creates_missing_index() {
        let mock = Arc::new(MockTransport::new());
        let client = client(mock.clone(), 3);

        client.initialize().await.unwrap();
        assert!(mock.has_index("offerings"));
        assert_eq!(mock.calls().create_index, 1);

        // Second run finds the index and leaves it alone
        client.initialize().await.unwrap();
        assert_eq!(mock.calls().create_index, 1);
        assert_eq!(mock.calls().get_mapping, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_rejects_incompatible_mapping() {
        let mock = Arc::new(
            MockTransport::new().with_mapping("offerings", json!({ "courseName": { "type": "keyword" } })),
        );
        let client = client(mock, 3);

        match client.initialize().await {
            Err(SearchError::MappingMismatch(detail)) => assert!(detail.contains("courseName")),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_one_waits_doubling_delays() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.push_failure(TransportError::Transient("timeout".into()));
        mock.push_failure(TransportError::Transient("timeout".into()));
        let client = client(mock.clone(), 10);

        client.upsert_one(&doc("a")).await.unwrap();

        let times = mock.write_times();
        assert_eq!(times.len(), 3);
        assert_eq!(times[1] - times[0], Duration::from_millis(400));
        assert_eq!(times[2] - times[1], Duration::from_millis(800));
        assert!(mock.document("a").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_one_exhausts_budget() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.fail_item("a", TransportError::Transient("unavailable".into()));
        let client = client(mock.clone(), 4);

        let err = client.upsert_one(&doc("a")).await.unwrap_err();
        assert!(matches!(err, SearchError::RetriesExhausted { attempts: 4, .. }));
        assert_eq!(mock.calls().upsert, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_one_permanent_error_not_retried() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.fail_item(
            "a",
            TransportError::Permanent {
                status: Some(400),
                reason: "mapper_parsing_exception".into(),
            },
        );
        let client = client(mock.clone(), 10);

        assert!(matches!(
            client.upsert_one(&doc("a")).await,
            Err(SearchError::Transport(_))
        ));
        assert_eq!(mock.calls().upsert, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_many_itemizes_failures() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.fail_item(
            "bad",
            TransportError::Permanent {
                status: Some(400),
                reason: "mapper_parsing_exception: failed to parse".into(),
            },
        );
        let client = client(mock.clone(), 10);

        let result = client.upsert_many(&[doc("a"), doc("bad"), doc("c")]).await;

        assert!(result.submitted);
        assert_eq!(result.succeeded, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].id, "bad");
        assert!(result.failed[0].reason.contains("mapper_parsing_exception"));
        assert_eq!(result.attempts, 1);
        assert_eq!(mock.document_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_many_retries_only_transient_items() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.fail_item("slow", TransportError::Transient("es_rejected_execution_exception".into()));
        let client = client(mock.clone(), 3);

        let result = client.upsert_many(&[doc("a"), doc("slow")]).await;

        assert_eq!(result.succeeded, vec!["a".to_string()]);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.attempts, 3);
        let batches = mock.bulk_batches();
        assert_eq!(batches[0], vec!["a".to_string(), "slow".to_string()]);
        assert_eq!(batches[1], vec!["slow".to_string()]);
        assert_eq!(mock.writes_for("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_many_remediates_read_only_block() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.set_read_only(true);
        let client = client(mock.clone(), 10);

        let result = client.upsert_many(&[doc("a"), doc("b")]).await;

        assert!(result.is_complete_success());
        assert!(result.remediated);
        assert_eq!(result.attempts, 2);
        assert_eq!(mock.calls().clear_read_only_block, 1);
        assert!(!mock.is_read_only());
        assert_eq!(mock.document_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_runs_once_per_operation() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.set_read_only(true);
        mock.set_clear_fails(true);
        let client = client(mock.clone(), 4);

        let result = client.upsert_many(&[doc("a")]).await;

        assert_eq!(result.failed.len(), 1);
        assert!(result.failed[0].reason.contains("read-only"));
        assert_eq!(mock.calls().clear_read_only_block, 1);
        assert_eq!(mock.calls().bulk_upsert, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_many_reroutes_unassigned_shards() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        mock.set_unassigned_shards(3);
        let client = client(mock.clone(), 3);

        let result = client.upsert_many(&[doc("a")]).await;

        assert!(result.is_complete_success());
        assert_eq!(mock.calls().reroute, 1);
        // Before and after the bulk
        assert_eq!(mock.calls().cluster_health, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upsert_many_empty_is_noop() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        let client = client(mock.clone(), 3);

        let result = client.upsert_many(&[]).await;
        assert!(!result.submitted);
        assert_eq!(result.total(), 0);
        assert_eq!(mock.calls(), CallCounts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_one() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        let client = client(mock.clone(), 3);

        client.upsert_one(&doc("a")).await.unwrap();
        client.delete_one("a").await.unwrap();
        assert!(mock.document("a").is_none());
        // Missing documents are fine
        client.delete_one("a").await.unwrap();
    }
}
