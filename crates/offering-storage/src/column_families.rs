//! Column family definitions for RocksDB.
//!
//! - markers: Idempotency markers, append-only (Universal compaction)
//! - tombstones: Deleted offerings by record id (default compaction)

use rocksdb::{ColumnFamilyDescriptor, Options};

/// Column family name for idempotency markers
pub const CF_MARKERS: &str = "markers";

/// Column family name for deletion tombstones
pub const CF_TOMBSTONES: &str = "tombstones";

/// All column family names
pub const ALL_CF_NAMES: &[&str] = &[CF_MARKERS, CF_TOMBSTONES];

/// Markers are small, written once and never rewritten
fn markers_options() -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
    opts.set_compaction_style(rocksdb::DBCompactionStyle::Universal);
    opts
}

/// Build all column family descriptors
pub fn build_cf_descriptors() -> Vec<ColumnFamilyDescriptor> {
    vec![
        ColumnFamilyDescriptor::new(CF_MARKERS, markers_options()),
        ColumnFamilyDescriptor::new(CF_TOMBSTONES, Options::default()),
    ]
}
