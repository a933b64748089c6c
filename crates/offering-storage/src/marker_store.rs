//! Marker store abstraction.
//!
//! The indexing engine checks markers before applying an update and
//! commits them after the search store confirmed the write.

use dashmap::{DashMap, DashSet};

use offering_types::{IdempotencyMarker, RecordId};

use crate::db::Storage;
use crate::error::StorageError;

/// Durable record of applied updates and deleted offerings.
pub trait MarkerStore: Send + Sync {
    /// Whether the update covered by `marker` was already applied.
    fn has_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError>;

    /// Record an applied update. Returns `false` if it was already recorded.
    fn commit_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError>;

    /// Whether the offering was deleted.
    fn is_tombstoned(&self, record_id: &RecordId) -> Result<bool, StorageError>;

    /// Record an offering deletion.
    fn put_tombstone(&self, record_id: &RecordId) -> Result<(), StorageError>;
}

impl MarkerStore for Storage {
    fn has_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        Storage::has_marker(self, marker)
    }

    fn commit_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        self.put_marker(marker)
    }

    fn is_tombstoned(&self, record_id: &RecordId) -> Result<bool, StorageError> {
        Storage::is_tombstoned(self, record_id)
    }

    fn put_tombstone(&self, record_id: &RecordId) -> Result<(), StorageError> {
        Storage::put_tombstone(self, record_id)
    }
}

/// Non-durable marker store for dry runs and tests.
#[derive(Debug, Default)]
pub struct InMemoryMarkerStore {
    markers: DashMap<String, IdempotencyMarker>,
    tombstones: DashSet<RecordId>,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    /// Look up a marker by its storage key.
    pub fn get(&self, key: &str) -> Option<IdempotencyMarker> {
        self.markers.get(key).map(|m| m.value().clone())
    }

    /// Sorted keys of every stored marker.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.markers.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl MarkerStore for InMemoryMarkerStore {
    fn has_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        Ok(self.markers.contains_key(&marker.key()))
    }

    fn commit_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        match self.markers.entry(marker.key()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(marker.clone());
                Ok(true)
            }
        }
    }

    fn is_tombstoned(&self, record_id: &RecordId) -> Result<bool, StorageError> {
        Ok(self.tombstones.contains(record_id))
    }

    fn put_tombstone(&self, record_id: &RecordId) -> Result<(), StorageError> {
        self.tombstones.insert(record_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_types::AttributeValue;
    use std::sync::Arc;

    fn exercise(store: &dyn MarkerStore) {
        let id = RecordId::from_encoded("r1");
        let marker =
            IdempotencyMarker::attribute(id.clone(), &AttributeValue::time("MF", "9:00"), &[]);

        assert!(!store.has_marker(&marker).unwrap());
        assert!(store.commit_marker(&marker).unwrap());
        assert!(!store.commit_marker(&marker).unwrap());
        assert!(store.has_marker(&marker).unwrap());

        assert!(!store.is_tombstoned(&id).unwrap());
        store.put_tombstone(&id).unwrap();
        assert!(store.is_tombstoned(&id).unwrap());
    }

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryMarkerStore::new();
        exercise(&store);
        assert_eq!(store.marker_count(), 1);
        assert_eq!(store.keys().len(), 1);
    }

    #[test]
    fn test_rocksdb_store() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        exercise(&storage);
    }

    #[test]
    fn test_concurrent_commit_writes_once() {
        let store = Arc::new(InMemoryMarkerStore::new());
        let marker = IdempotencyMarker::record(RecordId::from_encoded("race"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                let marker = marker.clone();
                std::thread::spawn(move || store.commit_marker(&marker).unwrap())
            })
            .collect();

        let written = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|created| *created)
            .count();
        assert_eq!(written, 1);
    }
}
