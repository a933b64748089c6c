//! Pending index queue.
//!
//! Tracks every observed offering with its latest attribute state. All
//! mutations and snapshot reads happen under one mutex; the map sits
//! behind an `Arc` and is cloned on write while a snapshot is held, so a
//! snapshot never changes after it was taken.
//!
//! Each entry carries a revision bumped by every effective mutation and
//! the revision last confirmed written. Markers for pending updates are
//! stamped with the revision that introduced them and released by
//! [`PendingIndexStore::mark_flushed`] once that revision is written.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;
use tracing::debug;

use offering_types::{AttributeValue, IdempotencyMarker, Offering, RecordId, SearchDocument};

use crate::state::PartialIndexState;

/// Immutable point-in-time view of the queue.
pub type Snapshot = Arc<HashMap<RecordId, PendingEntry>>;

/// One tracked offering.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    offering: Offering,
    state: PartialIndexState,
    revision: u64,
    flushed_revision: u64,
    pending_markers: Vec<(u64, IdempotencyMarker)>,
}

impl PendingEntry {
    fn new(offering: Offering) -> Self {
        Self {
            offering,
            state: PartialIndexState::default(),
            revision: 1,
            flushed_revision: 0,
            pending_markers: Vec::new(),
        }
    }

    /// Entry whose document is already in the store.
    fn clean(offering: Offering) -> Self {
        Self {
            flushed_revision: 1,
            ..Self::new(offering)
        }
    }

    pub fn offering(&self) -> &Offering {
        &self.offering
    }

    pub fn state(&self) -> &PartialIndexState {
        &self.state
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the store lags behind this entry.
    pub fn is_dirty(&self) -> bool {
        self.revision > self.flushed_revision
    }

    pub fn pending_marker_count(&self) -> usize {
        self.pending_markers.len()
    }

    fn attach(&mut self, marker: IdempotencyMarker) {
        if self
            .pending_markers
            .iter()
            .any(|(_, m)| m.covers_same_update(&marker))
        {
            return;
        }
        self.pending_markers.push((self.revision, marker));
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}

/// Result of a queue mutation.
#[derive(Debug, Clone)]
pub enum MutationOutcome {
    /// The entry awaits the next flush; any marker is held until then
    Pending,
    /// Nothing changed and the current value is already written; the
    /// marker can be committed right away
    AlreadyIndexed(Option<IdempotencyMarker>),
    /// The offering is not tracked and the update was dropped
    Untracked,
}

/// Dirty entry selected for a flush.
#[derive(Debug, Clone)]
pub struct DirtyEntry {
    pub id: RecordId,
    pub revision: u64,
    pub document: SearchDocument,
}

/// Queue counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub tracked: usize,
    pub dirty: usize,
    pub pending_markers: usize,
    pub dropped_untracked: u64,
    pub armed: bool,
    pub flushing: bool,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Snapshot,
    armed: bool,
    flushing: bool,
    dropped_untracked: u64,
}

/// Outcome of [`PendingIndexStore::begin_flush`].
pub enum FlushStart<'a> {
    /// Another flush holds the queue
    Busy,
    /// Nothing pending; the queue disarmed itself
    Idle,
    /// Dirty entries to write
    Ready(FlushBatch<'a>),
}

/// Entries selected for one flush.
///
/// Holds the queue's flushing flag until dropped.
pub struct FlushBatch<'a> {
    store: &'a PendingIndexStore,
    pub entries: Vec<DirtyEntry>,
}

impl FlushBatch<'_> {
    pub fn documents(&self) -> Vec<SearchDocument> {
        self.entries.iter().map(|e| e.document.clone()).collect()
    }
}

impl Drop for FlushBatch<'_> {
    fn drop(&mut self) {
        self.store.lock().flushing = false;
    }
}

/// Concurrent accumulator of per-offering index state.
#[derive(Debug, Default)]
pub struct PendingIndexStore {
    state: Mutex<QueueState>,
    armed_notify: Notify,
}

impl PendingIndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn arm(&self, state: &mut QueueState) {
        if !state.armed {
            state.armed = true;
            self.armed_notify.notify_one();
        }
    }

    /// Start tracking an offering. No-op if it is already tracked.
    ///
    /// `marker` is committed once the offering's document is written.
    pub fn upsert_entity(
        &self,
        id: RecordId,
        offering: Offering,
        marker: Option<IdempotencyMarker>,
    ) -> MutationOutcome {
        let mut state = self.lock();
        let entries = Arc::make_mut(&mut state.entries);

        if let Some(entry) = entries.get_mut(&id) {
            if entry.is_dirty() {
                if let Some(marker) = marker {
                    entry.attach(marker);
                }
                return MutationOutcome::Pending;
            }
            return MutationOutcome::AlreadyIndexed(marker);
        }

        let mut entry = PendingEntry::new(offering);
        if let Some(marker) = marker {
            entry.attach(marker);
        }
        debug!(record_id = %id, "Tracking offering");
        entries.insert(id, entry);
        self.arm(&mut state);
        MutationOutcome::Pending
    }

    /// Track an offering whose document is already in the store.
    ///
    /// Returns `false` if it was already tracked.
    pub fn restore_entity(&self, id: RecordId, offering: Offering) -> bool {
        let mut state = self.lock();
        let entries = Arc::make_mut(&mut state.entries);
        if entries.contains_key(&id) {
            return false;
        }
        entries.insert(id, PendingEntry::clean(offering));
        true
    }

    /// Force an entry to be written again, e.g. after a failed direct write.
    pub fn requeue(&self, id: &RecordId, marker: Option<IdempotencyMarker>) -> MutationOutcome {
        let mut state = self.lock();
        let entries = Arc::make_mut(&mut state.entries);
        let Some(entry) = entries.get_mut(id) else {
            return MutationOutcome::Untracked;
        };
        entry.touch();
        if let Some(marker) = marker {
            entry.attach(marker);
        }
        self.arm(&mut state);
        MutationOutcome::Pending
    }

    /// Stop tracking an offering. Returns `false` if it was not tracked.
    pub fn remove_entity(&self, id: &RecordId) -> bool {
        let mut state = self.lock();
        if !state.entries.contains_key(id) {
            return false;
        }
        Arc::make_mut(&mut state.entries).remove(id);
        self.arm(&mut state);
        true
    }

    /// Merge an attribute value into a tracked offering.
    ///
    /// Updates for untracked offerings are dropped and counted.
    pub fn apply_attribute(
        &self,
        id: &RecordId,
        value: AttributeValue,
        marker: Option<IdempotencyMarker>,
    ) -> MutationOutcome {
        let mut state = self.lock();
        if !state.entries.contains_key(id) {
            state.dropped_untracked += 1;
            debug!(
                record_id = %id,
                kind = %value.kind(),
                dropped_total = state.dropped_untracked,
                "Dropped attribute update for untracked offering"
            );
            return MutationOutcome::Untracked;
        }

        let entries = Arc::make_mut(&mut state.entries);
        let Some(entry) = entries.get_mut(id) else {
            return MutationOutcome::Untracked;
        };

        let update_hash = marker.as_ref().and_then(|m| m.update_hash());
        if entry.state.apply_update(value, update_hash) {
            entry.touch();
        } else if !entry.is_dirty() {
            return MutationOutcome::AlreadyIndexed(marker);
        }
        if let Some(marker) = marker {
            entry.attach(marker);
        }
        self.arm(&mut state);
        MutationOutcome::Pending
    }

    /// Merge an attribute update known to be in the store already.
    ///
    /// Fills kinds that are still unset and follows `prior` chains to
    /// newer values, see [`PartialIndexState::restore`]. Never dirties
    /// the entry.
    pub fn restore_attribute(
        &self,
        id: &RecordId,
        value: AttributeValue,
        update_hash: &str,
        prior: &[String],
    ) -> MutationOutcome {
        let mut state = self.lock();
        if !state.entries.contains_key(id) {
            state.dropped_untracked += 1;
            return MutationOutcome::Untracked;
        }
        let entries = Arc::make_mut(&mut state.entries);
        if let Some(entry) = entries.get_mut(id) {
            entry.state.restore(value, update_hash, prior);
        }
        MutationOutcome::AlreadyIndexed(None)
    }

    /// Atomic copy of the whole queue.
    pub fn snapshot(&self) -> Snapshot {
        self.lock().entries.clone()
    }

    /// Documents for every entry the store lags behind on.
    pub fn dirty_snapshot(&self) -> Vec<DirtyEntry> {
        dirty_entries(&self.snapshot())
    }

    /// Claim the queue for a flush.
    ///
    /// With no dirty entries the queue disarms and reports [`FlushStart::Idle`].
    pub fn begin_flush(&self) -> FlushStart<'_> {
        let snapshot = {
            let mut state = self.lock();
            if state.flushing {
                return FlushStart::Busy;
            }
            if !state.entries.values().any(PendingEntry::is_dirty) {
                state.armed = false;
                return FlushStart::Idle;
            }
            state.flushing = true;
            state.entries.clone()
        };

        FlushStart::Ready(FlushBatch {
            store: self,
            entries: dirty_entries(&snapshot),
        })
    }

    /// Record that `revision` of an entry was written.
    ///
    /// Returns the markers covered by that revision for committing.
    pub fn mark_flushed(&self, id: &RecordId, revision: u64) -> Vec<IdempotencyMarker> {
        let mut state = self.lock();
        if !state.entries.contains_key(id) {
            return Vec::new();
        }
        let entries = Arc::make_mut(&mut state.entries);
        let Some(entry) = entries.get_mut(id) else {
            return Vec::new();
        };

        entry.flushed_revision = entry.flushed_revision.max(revision);
        let (ready, waiting): (Vec<_>, Vec<_>) = entry
            .pending_markers
            .drain(..)
            .partition(|(stamp, _)| *stamp <= revision);
        entry.pending_markers = waiting;
        ready.into_iter().map(|(_, marker)| marker).collect()
    }

    pub fn is_armed(&self) -> bool {
        self.lock().armed
    }

    pub fn is_flushing(&self) -> bool {
        self.lock().flushing
    }

    /// Wait until a mutation arms the queue.
    pub async fn armed(&self) {
        loop {
            let notified = self.armed_notify.notified();
            if self.is_armed() {
                return;
            }
            notified.await;
        }
    }

    /// Current revision of a tracked entry.
    pub fn revision_of(&self, id: &RecordId) -> Option<u64> {
        self.lock().entries.get(id).map(PendingEntry::revision)
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.lock().entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            tracked: state.entries.len(),
            dirty: state.entries.values().filter(|e| e.is_dirty()).count(),
            pending_markers: state.entries.values().map(|e| e.pending_markers.len()).sum(),
            dropped_untracked: state.dropped_untracked,
            armed: state.armed,
            flushing: state.flushing,
        }
    }
}

fn dirty_entries(snapshot: &HashMap<RecordId, PendingEntry>) -> Vec<DirtyEntry> {
    snapshot
        .iter()
        .filter(|(_, entry)| entry.is_dirty())
        .map(|(id, entry)| DirtyEntry {
            id: id.clone(),
            revision: entry.revision,
            document: entry.state.to_document(id, &entry.offering),
        })
        .collect()
}
