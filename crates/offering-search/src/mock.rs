//! In-memory search store for tests.
//!
//! Failures can be scripted per call or per document, and the store can be
//! put into the read-only state to exercise remediation.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use offering_types::SearchDocument;

use crate::error::TransportError;
use crate::mapping;
use crate::transport::{BulkItemOutcome, ClusterHealth, HealthStatus, SearchTransport};

/// Number of calls made per operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub index_exists: usize,
    pub get_mapping: usize,
    pub create_index: usize,
    pub upsert: usize,
    pub bulk_upsert: usize,
    pub delete: usize,
    pub read_only_block: usize,
    pub clear_read_only_block: usize,
    pub cluster_health: usize,
    pub reroute: usize,
}

#[derive(Default)]
struct MockState {
    indices: HashMap<String, Value>,
    documents: HashMap<String, SearchDocument>,
    writes: Vec<SearchDocument>,
    bulk_batches: Vec<Vec<String>>,
    write_times: Vec<Instant>,
    read_only: bool,
    unassigned_shards: u32,
    scripted_failures: VecDeque<TransportError>,
    failing_items: HashMap<String, TransportError>,
    clear_fails: bool,
    calls: CallCounts,
}

/// Scriptable [`SearchTransport`] holding documents in memory.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<MockState>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create an index with the standard mapping.
    pub fn with_index(self, index: &str) -> Self {
        self.with_mapping(index, mapping::index_mapping()["mappings"]["properties"].clone())
    }

    /// Pre-create an index with arbitrary `properties`.
    pub fn with_mapping(self, index: &str, properties: Value) -> Self {
        self.lock().indices.insert(index.to_string(), properties);
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Put the index into (or out of) the read-only block.
    pub fn set_read_only(&self, read_only: bool) {
        self.lock().read_only = read_only;
    }

    pub fn is_read_only(&self) -> bool {
        self.lock().read_only
    }

    pub fn set_unassigned_shards(&self, count: u32) {
        self.lock().unassigned_shards = count;
    }

    /// Fail the next write call (upsert or bulk) as a whole.
    pub fn push_failure(&self, error: TransportError) {
        self.lock().scripted_failures.push_back(error);
    }

    /// Fail writes of one document until cleared.
    pub fn fail_item(&self, id: &str, error: TransportError) {
        self.lock().failing_items.insert(id.to_string(), error);
    }

    pub fn clear_item_failure(&self, id: &str) {
        self.lock().failing_items.remove(id);
    }

    /// Make read-only remediation fail.
    pub fn set_clear_fails(&self, fails: bool) {
        self.lock().clear_fails = fails;
    }

    pub fn document(&self, id: &str) -> Option<SearchDocument> {
        self.lock().documents.get(id).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.lock().documents.len()
    }

    /// Every successful document write, in order.
    pub fn writes(&self) -> Vec<SearchDocument> {
        self.lock().writes.clone()
    }

    pub fn writes_for(&self, id: &str) -> usize {
        self.lock().writes.iter().filter(|d| d.id == id).count()
    }

    /// Document ids submitted per bulk call.
    pub fn bulk_batches(&self) -> Vec<Vec<String>> {
        self.lock().bulk_batches.clone()
    }

    /// When each write call (upsert or bulk) arrived.
    pub fn write_times(&self) -> Vec<Instant> {
        self.lock().write_times.clone()
    }

    pub fn calls(&self) -> CallCounts {
        self.lock().calls.clone()
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.lock().indices.contains_key(index)
    }

    fn write_one(state: &mut MockState, doc: &SearchDocument) -> Result<(), TransportError> {
        if state.read_only {
            return Err(TransportError::ReadOnlyBlock(
                "index has read-only-allow-delete block".to_string(),
            ));
        }
        if let Some(error) = state.failing_items.get(&doc.id) {
            return Err(error.clone());
        }
        state.documents.insert(doc.id.clone(), doc.clone());
        state.writes.push(doc.clone());
        Ok(())
    }
}

#[async_trait]
impl SearchTransport for MockTransport {
    async fn index_exists(&self, index: &str) -> Result<bool, TransportError> {
        let mut state = self.lock();
        state.calls.index_exists += 1;
        Ok(state.indices.contains_key(index))
    }

    async fn get_mapping(&self, index: &str) -> Result<Value, TransportError> {
        let mut state = self.lock();
        state.calls.get_mapping += 1;
        state
            .indices
            .get(index)
            .cloned()
            .ok_or_else(|| TransportError::Permanent {
                status: Some(404),
                reason: format!("index_not_found_exception: no such index [{}]", index),
            })
    }

    async fn create_index(&self, index: &str, body: &Value) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.create_index += 1;
        let properties = body["mappings"]["properties"].clone();
        state.indices.entry(index.to_string()).or_insert(properties);
        Ok(())
    }

    async fn upsert(&self, _index: &str, doc: &SearchDocument) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.upsert += 1;
        state.write_times.push(Instant::now());
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        Self::write_one(&mut state, doc)
    }

    async fn bulk_upsert(
        &self,
        _index: &str,
        docs: &[SearchDocument],
    ) -> Result<Vec<BulkItemOutcome>, TransportError> {
        let mut state = self.lock();
        state.calls.bulk_upsert += 1;
        state.write_times.push(Instant::now());
        state
            .bulk_batches
            .push(docs.iter().map(|d| d.id.clone()).collect());
        if let Some(error) = state.scripted_failures.pop_front() {
            return Err(error);
        }
        Ok(docs
            .iter()
            .map(|doc| match Self::write_one(&mut state, doc) {
                Ok(()) => BulkItemOutcome::ok(doc.id.clone()),
                Err(e) => BulkItemOutcome::failed(doc.id.clone(), e),
            })
            .collect())
    }

    async fn delete(&self, _index: &str, id: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.delete += 1;
        state.documents.remove(id);
        Ok(())
    }

    async fn read_only_block(&self, _index: &str) -> Result<bool, TransportError> {
        let mut state = self.lock();
        state.calls.read_only_block += 1;
        Ok(state.read_only)
    }

    async fn clear_read_only_block(&self, _index: &str) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.clear_read_only_block += 1;
        if state.clear_fails {
            return Err(TransportError::Transient("settings update timed out".to_string()));
        }
        state.read_only = false;
        Ok(())
    }

    async fn cluster_health(&self) -> Result<ClusterHealth, TransportError> {
        let mut state = self.lock();
        state.calls.cluster_health += 1;
        let status = if state.unassigned_shards > 0 {
            HealthStatus::Yellow
        } else {
            HealthStatus::Green
        };
        Ok(ClusterHealth {
            status,
            active_shards: 1,
            unassigned_shards: state.unassigned_shards,
        })
    }

    async fn reroute_retry_failed(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.calls.reroute += 1;
        state.unassigned_shards = 0;
        Ok(())
    }
}
