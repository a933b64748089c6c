//! # offering-indexing
//!
//! Keeps the search index consistent with the offering change feed.
//!
//! ## Components
//! - [`PendingIndexStore`]: per-offering attribute state awaiting a flush
//! - [`FlushScheduler`]: interval-driven batch writes, idle when nothing is pending
//! - [`UpdateProjector`]: maps change events to queue mutations, commits markers
//! - [`IndexingEngine`]: lifecycle and cooperative shutdown
//!
//! ## Usage
//!
//! ```rust,ignore
//! let mut engine = IndexingEngine::from_settings(client, markers, &settings);
//! engine.initialize().await?;
//! engine.start(&feed)?;
//! // ...
//! engine.shutdown().await;
//! ```

pub mod engine;
pub mod error;
pub mod feed;
pub mod projector;
pub mod queue;
pub mod scheduler;
pub mod state;

pub use engine::{EngineStats, IndexingEngine, ShutdownReport};
pub use error::IndexingError;
pub use feed::{ChangeFeed, ChannelFeed, FeedSubscription, Subscription, DEFAULT_FEED_CAPACITY};
pub use projector::{Projection, ProjectorStatsSnapshot, UpdateProjector};
pub use queue::{
    DirtyEntry, FlushBatch, FlushStart, MutationOutcome, PendingEntry, PendingIndexStore,
    QueueStats, Snapshot,
};
pub use scheduler::{FlushOutcome, FlushReport, FlushScheduler, FlushStatsSnapshot};
pub use state::PartialIndexState;
