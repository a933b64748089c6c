//! Change event projection.
//!
//! Turns change events into queue mutations. Markers decide whether an
//! event was already applied; tombstones suppress events for deleted
//! offerings. A marker is committed only after the store confirmed the
//! write, either by a flush or by a direct write.
//!
//! Topics are consumed independently, so an attribute update can arrive
//! before the creation of its offering. Such updates are parked, bounded
//! per offering, and replayed once the offering is tracked.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use offering_search::BulkIndexClient;
use offering_storage::MarkerStore;
use offering_types::{
    AttributeValue, ChangeEvent, IdempotencyMarker, InitialIndexMode, Offering, RecordId,
    SearchDocument,
};

use crate::error::IndexingError;
use crate::feed::FeedSubscription;
use crate::queue::{MutationOutcome, PendingIndexStore};

/// Offerings with parked updates at any one time.
const MAX_PARKED_OFFERINGS: usize = 4096;
/// Parked updates kept per offering.
const MAX_PARKED_PER_OFFERING: usize = 16;

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// Queued for the next flush
    Queued,
    /// Written directly and marked
    Indexed,
    /// A marker already covers the event
    AlreadyApplied,
    /// The offering was deleted
    Tombstoned,
    /// Attribute update held until its offering is created
    Parked,
    /// Attribute update for an untracked offering, with no room to park it
    Dropped,
    /// Offering deleted
    Deleted,
}

/// Per-outcome event counters.
#[derive(Debug, Default)]
pub struct ProjectorStats {
    queued: AtomicU64,
    indexed: AtomicU64,
    already_applied: AtomicU64,
    tombstoned: AtomicU64,
    parked: AtomicU64,
    dropped: AtomicU64,
    deleted: AtomicU64,
    errors: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectorStatsSnapshot {
    pub queued: u64,
    pub indexed: u64,
    pub already_applied: u64,
    pub tombstoned: u64,
    pub parked: u64,
    pub dropped: u64,
    pub deleted: u64,
    pub errors: u64,
}

impl ProjectorStats {
    fn record(&self, projection: Projection) {
        let counter = match projection {
            Projection::Queued => &self.queued,
            Projection::Indexed => &self.indexed,
            Projection::AlreadyApplied => &self.already_applied,
            Projection::Tombstoned => &self.tombstoned,
            Projection::Parked => &self.parked,
            Projection::Dropped => &self.dropped,
            Projection::Deleted => &self.deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProjectorStatsSnapshot {
        ProjectorStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            already_applied: self.already_applied.load(Ordering::Relaxed),
            tombstoned: self.tombstoned.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            deleted: self.deleted.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
struct ParkedUpdate {
    value: AttributeValue,
    prior: Vec<String>,
}

/// Applies change events to the pending queue.
pub struct UpdateProjector {
    queue: Arc<PendingIndexStore>,
    client: Arc<BulkIndexClient>,
    markers: Arc<dyn MarkerStore>,
    mode: InitialIndexMode,
    parked: Mutex<HashMap<RecordId, Vec<ParkedUpdate>>>,
    stats: ProjectorStats,
}

impl UpdateProjector {
    pub fn new(
        queue: Arc<PendingIndexStore>,
        client: Arc<BulkIndexClient>,
        markers: Arc<dyn MarkerStore>,
        mode: InitialIndexMode,
    ) -> Self {
        Self {
            queue,
            client,
            markers,
            mode,
            parked: Mutex::new(HashMap::new()),
            stats: ProjectorStats::default(),
        }
    }

    pub fn stats(&self) -> ProjectorStatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of offerings with parked attribute updates.
    pub fn parked_offerings(&self) -> usize {
        self.lock_parked().len()
    }

    fn lock_parked(&self) -> MutexGuard<'_, HashMap<RecordId, Vec<ParkedUpdate>>> {
        self.parked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Project one event.
    #[instrument(
        skip_all,
        fields(topic = %event.topic(), record_id = %event.offering().record_id())
    )]
    pub async fn handle(&self, event: ChangeEvent) -> Result<Projection, IndexingError> {
        let projection = match event {
            ChangeEvent::OfferingCreated { offering } => self.on_created(offering).await?,
            ChangeEvent::AttributeUpdated {
                offering,
                value,
                prior,
            } => self.on_attribute(offering.record_id(), value, prior)?,
            ChangeEvent::OfferingDeleted { offering } => self.on_deleted(offering).await?,
        };
        self.stats.record(projection);
        Ok(projection)
    }

    async fn on_created(&self, offering: Offering) -> Result<Projection, IndexingError> {
        let id = offering.record_id();
        let projection = self.track_created(id.clone(), offering).await?;
        if projection == Projection::Tombstoned {
            self.lock_parked().remove(&id);
        } else {
            self.replay_parked(&id);
        }
        Ok(projection)
    }

    async fn track_created(
        &self,
        id: RecordId,
        offering: Offering,
    ) -> Result<Projection, IndexingError> {
        if self.markers.is_tombstoned(&id)? {
            debug!("Ignoring creation of deleted offering");
            return Ok(Projection::Tombstoned);
        }

        let marker = IdempotencyMarker::record(id.clone());
        if self.markers.has_marker(&marker)? {
            self.queue.restore_entity(id, offering);
            return Ok(Projection::AlreadyApplied);
        }

        if self.mode == InitialIndexMode::Direct && !self.queue.contains(&id) {
            return self.index_directly(offering, marker).await;
        }

        let outcome = self.queue.upsert_entity(id, offering, Some(marker));
        self.settle(outcome)
    }

    /// Write a placeholder document right away, falling back to the queue.
    ///
    /// The offering is tracked as clean before the write so attribute
    /// updates are not parked meanwhile. If the entry moved while the
    /// write was in flight, the placeholder may have overwritten newer
    /// state and the entry is queued for a full rewrite.
    async fn index_directly(
        &self,
        offering: Offering,
        marker: IdempotencyMarker,
    ) -> Result<Projection, IndexingError> {
        let id = offering.record_id();
        let document = SearchDocument::placeholder(&id, &offering);
        let (code, name) = (offering.course.code.clone(), offering.course.name.clone());
        self.queue.restore_entity(id.clone(), offering);
        let observed = self.queue.revision_of(&id);

        if let Err(e) = self.client.upsert_one(&document).await {
            warn!(error = %e, "Direct index failed, queueing for next flush");
            let outcome = self.queue.requeue(&id, Some(marker));
            return self.settle(outcome);
        }
        self.markers.commit_marker(&marker)?;

        let current = self.queue.revision_of(&id);
        if current.is_none() {
            // Deleted while the placeholder was in flight
            if let Err(e) = self.client.delete_one(id.as_str()).await {
                warn!(error = %e, "Failed to delete document");
            }
            return Ok(Projection::Tombstoned);
        }
        if current != observed {
            debug!("Offering changed during direct write, queueing full document");
            self.queue.requeue(&id, None);
        }

        info!(course_code = %code, course_name = %name, "Indexed offering");
        Ok(Projection::Indexed)
    }

    fn on_attribute(
        &self,
        id: RecordId,
        value: AttributeValue,
        prior: Vec<String>,
    ) -> Result<Projection, IndexingError> {
        if self.markers.is_tombstoned(&id)? {
            debug!(kind = %value.kind(), "Ignoring update of deleted offering");
            return Ok(Projection::Tombstoned);
        }

        let marker = IdempotencyMarker::attribute(id.clone(), &value, &prior);
        let outcome = if self.markers.has_marker(&marker)? {
            let update_hash = value.update_hash(&prior);
            match self
                .queue
                .restore_attribute(&id, value.clone(), &update_hash, &prior)
            {
                MutationOutcome::Untracked => MutationOutcome::Untracked,
                _ => return Ok(Projection::AlreadyApplied),
            }
        } else {
            self.queue.apply_attribute(&id, value.clone(), Some(marker))
        };

        match outcome {
            MutationOutcome::Untracked => Ok(self.park(id, ParkedUpdate { value, prior })),
            outcome => self.settle(outcome),
        }
    }

    /// Hold an update for an offering that is not tracked yet.
    fn park(&self, id: RecordId, update: ParkedUpdate) -> Projection {
        let kind = update.value.kind();
        let mut parked = self.lock_parked();
        if !parked.contains_key(&id) && parked.len() >= MAX_PARKED_OFFERINGS {
            warn!(%kind, "Parked update limit reached, dropping update");
            return Projection::Dropped;
        }
        let updates = parked.entry(id).or_default();
        if updates.len() >= MAX_PARKED_PER_OFFERING {
            warn!(%kind, parked = updates.len(), "Parked update limit reached for offering");
            return Projection::Dropped;
        }
        updates.push(update);
        debug!(%kind, parked = updates.len(), "Parked update until offering is created");
        Projection::Parked
    }

    fn replay_parked(&self, id: &RecordId) {
        let Some(updates) = self.lock_parked().remove(id) else {
            return;
        };
        debug!(count = updates.len(), "Replaying parked updates");
        for ParkedUpdate { value, prior } in updates {
            match self.on_attribute(id.clone(), value, prior) {
                Ok(projection) => self.stats.record(projection),
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    error!(error = %e, "Failed to replay parked update");
                }
            }
        }
    }

    async fn on_deleted(&self, offering: Offering) -> Result<Projection, IndexingError> {
        let id = offering.record_id();
        self.queue.remove_entity(&id);
        self.lock_parked().remove(&id);
        self.markers.put_tombstone(&id)?;

        if let Err(e) = self.client.delete_one(id.as_str()).await {
            warn!(error = %e, "Failed to delete document");
        }
        info!(
            course_code = %offering.course.code,
            course_name = %offering.course.name,
            "Removed offering"
        );
        Ok(Projection::Deleted)
    }

    fn settle(&self, outcome: MutationOutcome) -> Result<Projection, IndexingError> {
        match outcome {
            MutationOutcome::Pending => Ok(Projection::Queued),
            MutationOutcome::AlreadyIndexed(marker) => {
                if let Some(marker) = marker {
                    self.markers.commit_marker(&marker)?;
                }
                Ok(Projection::AlreadyApplied)
            }
            MutationOutcome::Untracked => Ok(Projection::Dropped),
        }
    }

    /// Consume a subscription until it is stopped or the feed closes.
    pub fn spawn(self: &Arc<Self>, subscription: FeedSubscription) -> JoinHandle<()> {
        let projector = Arc::clone(self);
        tokio::spawn(async move { projector.run(subscription).await })
    }

    async fn run(&self, subscription: FeedSubscription) {
        let FeedSubscription { mut events, handle } = subscription;
        let topic = handle.topic();
        debug!(topic = %topic, "Projector started");

        loop {
            let event = tokio::select! {
                _ = handle.stopped() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            if let Err(e) = self.handle(event).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                error!(topic = %topic, error = %e, "Failed to project event");
            }
        }

        debug!(topic = %topic, "Projector stopped");
    }
}
