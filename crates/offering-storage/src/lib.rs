//! Storage layer for the offering indexer.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for markers and tombstones
//! - Idempotent, append-only marker writes
//! - Deletion tombstones so late events for deleted offerings are ignored
//!
//! The [`MarkerStore`] trait is the seam the indexing engine depends on;
//! [`Storage`] is the durable implementation and [`InMemoryMarkerStore`]
//! serves dry runs and tests.

pub mod column_families;
pub mod db;
pub mod error;
pub mod keys;
pub mod marker_store;

pub use db::{Storage, StorageStats};
pub use error::StorageError;
pub use keys::TombstoneKey;
pub use marker_store::{InMemoryMarkerStore, MarkerStore};
