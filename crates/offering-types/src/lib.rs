//! # offering-types
//!
//! Shared domain types for the offering search indexer.
//!
//! This crate defines the data structures passed between the change feed,
//! the pending index queue and the search store client:
//! - Offerings and their identity fields
//! - Attribute values (time, location, instructor)
//! - Stable record ids derived from identity fields
//! - Search documents as written to the external store
//! - Idempotency markers and change events
//! - Settings: layered configuration

pub mod config;
pub mod document;
pub mod error;
pub mod event;
pub mod marker;
pub mod offering;
pub mod record_id;

pub use config::{
    FlushSettings, InitialIndexMode, RetrySettings, SearchSettings, Settings,
};
pub use document::{SearchDocument, TBA};
pub use error::OfferingError;
pub use event::{ChangeEvent, FeedTopic};
pub use marker::{IdempotencyMarker, MarkerScope};
pub use offering::{
    AttributeKind, AttributeValue, Course, Offering, OfferingInstructor, OfferingLocation,
    OfferingTime, Semester,
};
pub use record_id::{encode_url_safe, CanonicalHasher, RecordId};
