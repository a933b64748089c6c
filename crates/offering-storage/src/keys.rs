//! Key encoding for the storage layer.
//!
//! Marker keys come from [`IdempotencyMarker::key`]:
//! `rec:{record_id}` or `upd:{record_id}:{kind}:{update_hash}`.
//! Tombstone keys use `del:{record_id}`.
//!
//! [`IdempotencyMarker::key`]: offering_types::IdempotencyMarker::key

use offering_types::RecordId;

use crate::error::StorageError;

/// Key for a deletion tombstone
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TombstoneKey {
    pub record_id: RecordId,
}

impl TombstoneKey {
    pub fn new(record_id: RecordId) -> Self {
        Self { record_id }
    }

    /// Format: "del:{record_id}"
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("del:{}", self.record_id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id = s
            .strip_prefix("del:")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StorageError::Key(format!("Invalid tombstone key format: {}", s)))?;
        Ok(Self::new(RecordId::from_encoded(id)))
    }
}

/// Prefix shared by all attribute markers of one record.
///
/// The trailing separator keeps `upd:abc:` from matching `upd:abcd:`.
pub fn attribute_marker_prefix(record_id: &RecordId) -> Vec<u8> {
    format!("upd:{}:", record_id).into_bytes()
}
