//! Flush scheduler.
//!
//! Idle until a queue mutation arms it, then ticks on a fixed interval.
//! Each tick writes the dirty entries through [`BulkIndexClient`]; a tick
//! that finds nothing dirty disarms the queue and the scheduler goes back
//! to idle. Ticks that land during a flush are dropped.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use offering_search::BulkIndexClient;
use offering_storage::MarkerStore;

use crate::queue::{FlushStart, PendingIndexStore};

/// Result of one flush attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was in progress
    Skipped,
    /// Nothing was pending; the scheduler disarmed
    Idle,
    Flushed(FlushReport),
}

/// Counts for one completed flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub attempted: usize,
    pub written: usize,
    pub failed: usize,
    pub markers_committed: usize,
    pub marker_errors: usize,
}

/// Cumulative flush counters.
#[derive(Debug, Default)]
pub struct FlushStats {
    flushes: AtomicU64,
    skipped_ticks: AtomicU64,
    documents_written: AtomicU64,
    documents_failed: AtomicU64,
    markers_committed: AtomicU64,
}

/// Point-in-time copy of [`FlushStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushStatsSnapshot {
    pub flushes: u64,
    pub skipped_ticks: u64,
    pub documents_written: u64,
    pub documents_failed: u64,
    pub markers_committed: u64,
}

impl FlushStats {
    pub fn snapshot(&self) -> FlushStatsSnapshot {
        FlushStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            skipped_ticks: self.skipped_ticks.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            documents_failed: self.documents_failed.load(Ordering::Relaxed),
            markers_committed: self.markers_committed.load(Ordering::Relaxed),
        }
    }
}

/// Periodically writes pending queue state to the search store.
pub struct FlushScheduler {
    queue: Arc<PendingIndexStore>,
    client: Arc<BulkIndexClient>,
    markers: Arc<dyn MarkerStore>,
    interval: Duration,
    stats: FlushStats,
}

impl FlushScheduler {
    pub fn new(
        queue: Arc<PendingIndexStore>,
        client: Arc<BulkIndexClient>,
        markers: Arc<dyn MarkerStore>,
        interval: Duration,
    ) -> Self {
        Self {
            queue,
            client,
            markers,
            interval,
            stats: FlushStats::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn stats(&self) -> FlushStatsSnapshot {
        self.stats.snapshot()
    }

    /// Run one flush unless another is in progress.
    pub async fn try_flush(&self) -> FlushOutcome {
        let batch = match self.queue.begin_flush() {
            FlushStart::Busy => {
                debug!("Flush in progress, skipping tick");
                self.stats.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                return FlushOutcome::Skipped;
            }
            FlushStart::Idle => {
                debug!("Nothing pending, scheduler idle");
                return FlushOutcome::Idle;
            }
            FlushStart::Ready(batch) => batch,
        };

        let documents = batch.documents();
        debug!(documents = documents.len(), "Flushing pending offerings");
        let result = self.client.upsert_many(&documents).await;
        let succeeded: HashSet<&str> = result.succeeded.iter().map(String::as_str).collect();

        let mut report = FlushReport {
            attempted: documents.len(),
            written: result.succeeded.len(),
            failed: result.failed.len(),
            ..Default::default()
        };

        for entry in &batch.entries {
            if !succeeded.contains(entry.id.as_str()) {
                continue;
            }
            for marker in self.queue.mark_flushed(&entry.id, entry.revision) {
                match self.markers.commit_marker(&marker) {
                    Ok(_) => report.markers_committed += 1,
                    Err(e) => {
                        warn!(key = %marker.key(), error = %e, "Failed to commit marker");
                        report.marker_errors += 1;
                    }
                }
            }
        }
        drop(batch);

        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .documents_written
            .fetch_add(report.written as u64, Ordering::Relaxed);
        self.stats
            .documents_failed
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.stats
            .markers_committed
            .fetch_add(report.markers_committed as u64, Ordering::Relaxed);

        if report.failed > 0 {
            warn!(
                failed = report.failed,
                "Offerings left pending for the next flush"
            );
        }
        info!(
            attempted = report.attempted,
            written = report.written,
            failed = report.failed,
            markers = report.markers_committed,
            "Flush complete"
        );
        FlushOutcome::Flushed(report)
    }

    /// Scheduler loop. Returns when `cancel` fires.
    ///
    /// An in-flight flush always runs to completion before the loop
    /// observes cancellation.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "Flush scheduler started");

        'idle: loop {
            tokio::select! {
                _ = cancel.cancelled() => break 'idle,
                _ = self.queue.armed() => {}
            }
            debug!("Flush scheduler armed");

            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break 'idle,
                    _ = ticker.tick() => {}
                }
                if self.try_flush().await == FlushOutcome::Idle {
                    continue 'idle;
                }
            }
        }

        info!("Flush scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_search::mock::MockTransport;
    use offering_search::{RetryPolicy, TransportError};
    use offering_storage::InMemoryMarkerStore;
    use offering_types::{AttributeValue, Course, IdempotencyMarker, Offering, Semester};
    use uuid::Uuid;

    struct Harness {
        queue: Arc<PendingIndexStore>,
        mock: Arc<MockTransport>,
        markers: Arc<InMemoryMarkerStore>,
        scheduler: Arc<FlushScheduler>,
    }

    fn harness() -> Harness {
        let queue = Arc::new(PendingIndexStore::new());
        let mock = Arc::new(MockTransport::new().with_index("offerings"));
        let markers = Arc::new(InMemoryMarkerStore::new());
        let client = Arc::new(BulkIndexClient::new(
            mock.clone(),
            "offerings",
            RetryPolicy::new(3, Duration::from_millis(10)),
        ));
        let scheduler = Arc::new(FlushScheduler::new(
            queue.clone(),
            client,
            markers.clone(),
            Duration::from_secs(5),
        ));
        Harness {
            queue,
            mock,
            markers,
            scheduler,
        }
    }

    fn offering(code: &str) -> Offering {
        Offering::new(
            Course::new(code, "Intro"),
            Semester::new(2022, "Spring"),
            Uuid::new_v4(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_flush_commits_markers_after_write() {
        let h = harness();
        let o = offering("CS 101");
        let id = o.record_id();
        h.queue
            .upsert_entity(id.clone(), o, Some(IdempotencyMarker::record(id.clone())));

        let outcome = h.scheduler.try_flush().await;
        match outcome {
            FlushOutcome::Flushed(report) => {
                assert_eq!(report.written, 1);
                assert_eq!(report.markers_committed, 1);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(h.mock.document(id.as_str()).is_some());
        assert_eq!(h.markers.keys(), vec![format!("rec:{}", id)]);

        assert_eq!(h.scheduler.try_flush().await, FlushOutcome::Idle);
        assert!(!h.queue.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_document_stays_dirty_without_marker() {
        let h = harness();
        let o = offering("CS 101");
        let id = o.record_id();
        h.queue
            .upsert_entity(id.clone(), o, Some(IdempotencyMarker::record(id.clone())));
        h.mock.fail_item(
            id.as_str(),
            TransportError::Permanent {
                status: Some(400),
                reason: "mapper_parsing_exception".into(),
            },
        );

        let FlushOutcome::Flushed(report) = h.scheduler.try_flush().await else {
            panic!("expected a flush");
        };
        assert_eq!(report.failed, 1);
        assert_eq!(h.markers.marker_count(), 0);
        assert_eq!(h.queue.dirty_snapshot().len(), 1);

        // Next cycle succeeds once the store accepts the document
        h.mock.clear_item_failure(id.as_str());
        let FlushOutcome::Flushed(report) = h.scheduler.try_flush().await else {
            panic!("expected a flush");
        };
        assert_eq!(report.markers_committed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_coalesces_bursts_into_interval_flushes() {
        let h = harness();
        let cancel = CancellationToken::new();
        let task = {
            let scheduler = h.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        let offerings: Vec<Offering> = (0..10).map(|i| offering(&format!("CS {}", i))).collect();
        for o in &offerings {
            h.queue.upsert_entity(o.record_id(), o.clone(), None);
        }
        for round in 0..20 {
            for o in &offerings {
                h.queue.apply_attribute(
                    &o.record_id(),
                    AttributeValue::instructor(format!("Prof {}", round)),
                    None,
                );
            }
        }

        // Three intervals elapse
        tokio::time::sleep(Duration::from_secs(15) + Duration::from_millis(100)).await;

        let bulk_calls = h.mock.calls().bulk_upsert;
        assert!(bulk_calls >= 1 && bulk_calls <= 3, "bulk calls: {}", bulk_calls);
        assert_eq!(h.mock.document_count(), 10);
        assert_eq!(h.mock.writes_for(offerings[0].record_id().as_str()), 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_goes_idle_when_nothing_pending() {
        let h = harness();
        let cancel = CancellationToken::new();
        let task = {
            let scheduler = h.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        let o = offering("CS 101");
        h.queue.upsert_entity(o.record_id(), o.clone(), None);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(h.mock.calls().bulk_upsert, 1);
        assert!(!h.queue.is_armed());

        // No ticks while idle
        let health_calls = h.mock.calls().cluster_health;
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(h.mock.calls().bulk_upsert, 1);
        assert_eq!(h.mock.calls().cluster_health, health_calls);

        // A new mutation re-arms
        h.queue
            .apply_attribute(&o.record_id(), AttributeValue::time("MF", "10:00"), None);
        assert!(h.queue.is_armed());
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(h.mock.calls().bulk_upsert, 2);
        assert_eq!(h.mock.document(o.record_id().as_str()).unwrap().days, "MF");

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_try_flush_skips() {
        let h = harness();
        let o = offering("CS 101");
        h.queue.upsert_entity(o.record_id(), o, None);
        // Slow the write down so the second call lands mid-flush
        h.mock.push_failure(TransportError::Transient("timeout".into()));

        let (first, second) = tokio::join!(h.scheduler.try_flush(), async {
            tokio::task::yield_now().await;
            h.scheduler.try_flush().await
        });

        assert!(matches!(first, FlushOutcome::Flushed(_)));
        assert_eq!(second, FlushOutcome::Skipped);
        assert_eq!(h.scheduler.stats().skipped_ticks, 1);
    }
}
