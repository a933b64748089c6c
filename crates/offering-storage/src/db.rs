//! RocksDB wrapper for marker storage.
//!
//! Provides:
//! - Database open with column family setup
//! - Put-if-absent marker writes (markers are never revised)
//! - Tombstone writes and lookups
//! - Admin statistics

use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use offering_types::{IdempotencyMarker, RecordId};

use crate::column_families::{build_cf_descriptors, ALL_CF_NAMES, CF_MARKERS, CF_TOMBSTONES};
use crate::error::StorageError;
use crate::keys::{attribute_marker_prefix, TombstoneKey};

/// Durable marker and tombstone storage
pub struct Storage {
    db: DB,
    /// Serializes check-then-put so a marker is written at most once
    write_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the given path, creating if necessary
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        info!("Opening storage at {:?}", path);

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_background_jobs(2);

        let db = DB::open_cf_descriptors(&db_opts, path, build_cf_descriptors())?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StorageError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound(name.to_string()))
    }

    /// Check whether the update covered by `marker` was already applied.
    pub fn has_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        let cf = self.cf(CF_MARKERS)?;
        Ok(self.db.get_pinned_cf(cf, marker.key().as_bytes())?.is_some())
    }

    /// Store a marker unless one already exists for the same update.
    ///
    /// Returns `true` if the marker was written, `false` if it existed.
    pub fn put_marker(&self, marker: &IdempotencyMarker) -> Result<bool, StorageError> {
        let cf = self.cf(CF_MARKERS)?;
        let key = marker.key();

        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| StorageError::Key(format!("marker lock poisoned: {}", e)))?;

        if self.db.get_pinned_cf(cf, key.as_bytes())?.is_some() {
            debug!(key = %key, "Marker already exists, skipping");
            return Ok(false);
        }

        self.db.put_cf(cf, key.as_bytes(), marker.to_bytes()?)?;
        debug!(key = %key, "Stored marker");
        Ok(true)
    }

    /// Fetch a stored marker by key.
    pub fn get_marker(&self, key: &str) -> Result<Option<IdempotencyMarker>, StorageError> {
        let cf = self.cf(CF_MARKERS)?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => Ok(Some(IdempotencyMarker::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All markers recorded for one offering.
    pub fn markers_for(&self, record_id: &RecordId) -> Result<Vec<IdempotencyMarker>, StorageError> {
        let cf = self.cf(CF_MARKERS)?;
        let mut results = Vec::new();

        let record_key = IdempotencyMarker::record(record_id.clone()).key();
        if let Some(bytes) = self.db.get_cf(cf, record_key.as_bytes())? {
            results.push(IdempotencyMarker::from_bytes(&bytes)?);
        }

        let prefix = attribute_marker_prefix(record_id);
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&prefix, Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(&prefix) {
                break;
            }
            results.push(IdempotencyMarker::from_bytes(&value)?);
        }

        Ok(results)
    }

    /// Record that an offering was deleted.
    pub fn put_tombstone(&self, record_id: &RecordId) -> Result<(), StorageError> {
        let cf = self.cf(CF_TOMBSTONES)?;
        let key = TombstoneKey::new(record_id.clone());
        let now_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        self.db.put_cf(cf, key.to_bytes(), now_ms.to_be_bytes())?;
        debug!(record_id = %record_id, "Stored tombstone");
        Ok(())
    }

    /// Check whether an offering was deleted.
    pub fn is_tombstoned(&self, record_id: &RecordId) -> Result<bool, StorageError> {
        let cf = self.cf(CF_TOMBSTONES)?;
        let key = TombstoneKey::new(record_id.clone());
        Ok(self.db.get_pinned_cf(cf, key.to_bytes())?.is_some())
    }

    /// Flush all column families to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        for cf_name in ALL_CF_NAMES {
            let cf = self.cf(cf_name)?;
            self.db.flush_cf(cf)?;
        }
        Ok(())
    }

    /// Get database statistics.
    pub fn get_stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            marker_count: self.count_cf_entries(self.cf(CF_MARKERS)?)?,
            tombstone_count: self.count_cf_entries(self.cf(CF_TOMBSTONES)?)?,
            disk_usage_bytes: self.get_disk_usage(),
        })
    }

    fn count_cf_entries(&self, cf: &rocksdb::ColumnFamily) -> Result<u64, StorageError> {
        let mut count = 0u64;
        for item in self.db.iterator_cf(cf, IteratorMode::Start) {
            item?;
            count += 1;
        }
        Ok(count)
    }

    fn get_disk_usage(&self) -> u64 {
        std::fs::read_dir(self.db.path())
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|entry| entry.metadata().ok())
                    .map(|metadata| metadata.len())
                    .sum()
            })
            .unwrap_or(0)
    }
}

/// Statistics about the storage.
#[derive(Debug, Default)]
pub struct StorageStats {
    /// Number of idempotency markers
    pub marker_count: u64,
    /// Number of deleted offerings
    pub tombstone_count: u64,
    /// Total disk usage in bytes
    pub disk_usage_bytes: u64,
}
