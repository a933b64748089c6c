//! # offering-search
//!
//! Client for the external full-text search store.
//!
//! ## Features
//! - Index bootstrap with field mappings ([`BulkIndexClient::initialize`])
//! - Create-or-update writes by deterministic id, single and bulk
//! - Bounded retry with doubling delays ([`RetryPolicy`])
//! - Per-document itemized bulk results ([`BulkIndexResult`])
//! - Remediation of degraded stores: read-only blocks and unassigned shards
//!
//! The wire protocol sits behind [`SearchTransport`]; the HTTP
//! implementation is [`ElasticsearchTransport`] and [`mock::MockTransport`]
//! is an in-memory store for tests.

pub mod client;
pub mod elasticsearch;
pub mod error;
pub mod mapping;
pub mod mock;
pub mod retry;
pub mod transport;

pub use client::{BulkIndexClient, BulkIndexResult, BulkItemError, Remediation};
pub use elasticsearch::ElasticsearchTransport;
pub use error::{SearchError, TransportError};
pub use mapping::{index_mapping, mapping_mismatches};
pub use retry::{DoublingBackoff, RetryPolicy};
pub use transport::{BulkItemOutcome, ClusterHealth, HealthStatus, SearchTransport};
