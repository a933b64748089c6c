//! Idempotency markers.
//!
//! A marker asserts that one specific update has been applied to the
//! search index. Markers are written only after the store confirmed the
//! write and are never revised or deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::offering::{AttributeKind, AttributeValue};
use crate::record_id::RecordId;

/// What a marker covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum MarkerScope {
    /// The offering's initial document was indexed
    Record,
    /// A specific attribute update was indexed
    Attribute {
        kind: AttributeKind,
        update_hash: String,
    },
}

/// Durable proof that an update reached the search index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyMarker {
    pub record_id: RecordId,
    #[serde(flatten)]
    pub scope: MarkerScope,
    /// When the write was confirmed (milliseconds since epoch)
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub applied_at: DateTime<Utc>,
}

impl IdempotencyMarker {
    /// Marker for an offering's initial index record.
    pub fn record(record_id: RecordId) -> Self {
        Self {
            record_id,
            scope: MarkerScope::Record,
            applied_at: Utc::now(),
        }
    }

    /// Marker for one attribute update of an offering.
    ///
    /// `prior` lists the update hashes the value supersedes, see
    /// [`AttributeValue::update_hash`].
    pub fn attribute(record_id: RecordId, value: &AttributeValue, prior: &[String]) -> Self {
        Self {
            record_id,
            scope: MarkerScope::Attribute {
                kind: value.kind(),
                update_hash: value.update_hash(prior),
            },
            applied_at: Utc::now(),
        }
    }

    /// Hash of the covered attribute update.
    pub fn update_hash(&self) -> Option<&str> {
        match &self.scope {
            MarkerScope::Record => None,
            MarkerScope::Attribute { update_hash, .. } => Some(update_hash),
        }
    }

    /// Storage key, independent of `applied_at`.
    ///
    /// Format: `rec:{record_id}` or `upd:{record_id}:{kind}:{update_hash}`
    pub fn key(&self) -> String {
        match &self.scope {
            MarkerScope::Record => format!("rec:{}", self.record_id),
            MarkerScope::Attribute { kind, update_hash } => {
                format!("upd:{}:{}:{}", self.record_id, kind, update_hash)
            }
        }
    }

    /// Two markers cover the same update when their keys match.
    pub fn covers_same_update(&self, other: &IdempotencyMarker) -> bool {
        self.record_id == other.record_id && self.scope == other.scope
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
