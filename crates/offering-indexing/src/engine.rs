//! Indexing engine lifecycle.
//!
//! Wires one projector task per feed topic and the flush scheduler
//! around a shared [`PendingIndexStore`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use offering_search::BulkIndexClient;
use offering_storage::MarkerStore;
use offering_types::{FeedTopic, FlushSettings, InitialIndexMode, Settings};

use crate::error::IndexingError;
use crate::feed::{ChangeFeed, Subscription};
use crate::projector::{ProjectorStatsSnapshot, UpdateProjector};
use crate::queue::{PendingIndexStore, QueueStats};
use crate::scheduler::{FlushOutcome, FlushScheduler, FlushStatsSnapshot};

/// Engine counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub queue: QueueStats,
    pub projector: ProjectorStatsSnapshot,
    pub flush: FlushStatsSnapshot,
}

/// How shutdown went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Result of the final flush, if one ran
    pub final_flush: Option<FlushOutcome>,
    /// Some work was aborted at the deadline
    pub timed_out: bool,
}

struct Running {
    cancel: CancellationToken,
    subscriptions: Vec<Subscription>,
    projectors: Vec<JoinHandle<()>>,
    scheduler: JoinHandle<()>,
}

/// Keeps the search index in sync with a change feed.
pub struct IndexingEngine {
    queue: Arc<PendingIndexStore>,
    client: Arc<BulkIndexClient>,
    projector: Arc<UpdateProjector>,
    scheduler: Arc<FlushScheduler>,
    flush: FlushSettings,
    running: Option<Running>,
}

impl IndexingEngine {
    pub fn new(
        client: Arc<BulkIndexClient>,
        markers: Arc<dyn MarkerStore>,
        flush: FlushSettings,
        mode: InitialIndexMode,
    ) -> Self {
        let queue = Arc::new(PendingIndexStore::new());
        let projector = Arc::new(UpdateProjector::new(
            queue.clone(),
            client.clone(),
            markers.clone(),
            mode,
        ));
        let scheduler = Arc::new(FlushScheduler::new(
            queue.clone(),
            client.clone(),
            markers,
            flush.interval(),
        ));
        Self {
            queue,
            client,
            projector,
            scheduler,
            flush,
            running: None,
        }
    }

    pub fn from_settings(
        client: Arc<BulkIndexClient>,
        markers: Arc<dyn MarkerStore>,
        settings: &Settings,
    ) -> Self {
        Self::new(
            client,
            markers,
            settings.flush.clone(),
            settings.initial_index_mode,
        )
    }

    /// Ensure the search index exists. Failure here is fatal.
    pub async fn initialize(&self) -> Result<(), IndexingError> {
        self.client.initialize().await?;
        Ok(())
    }

    /// Subscribe to every topic and start the scheduler.
    pub fn start(&mut self, feed: &dyn ChangeFeed) -> Result<(), IndexingError> {
        if self.running.is_some() {
            return Err(IndexingError::Lifecycle("engine already running".into()));
        }

        let mut subscriptions = Vec::with_capacity(FeedTopic::ALL.len());
        let mut projectors = Vec::with_capacity(FeedTopic::ALL.len());
        for topic in FeedTopic::ALL {
            let subscription = feed.subscribe(topic);
            subscriptions.push(subscription.handle.clone());
            projectors.push(self.projector.spawn(subscription));
        }

        let cancel = CancellationToken::new();
        let scheduler = {
            let scheduler = self.scheduler.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        info!(
            topics = FeedTopic::ALL.len(),
            interval_ms = self.flush.interval_ms,
            "Indexing engine started"
        );
        self.running = Some(Running {
            cancel,
            subscriptions,
            projectors,
            scheduler,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Wait until every projector reaches the end of its event stream.
    ///
    /// Returns once the feed is closed and everything it buffered has been
    /// projected. The scheduler keeps running.
    pub async fn wait_for_feed_end(&mut self) {
        let Some(running) = self.running.as_mut() else {
            return;
        };
        let projectors = std::mem::take(&mut running.projectors);
        for result in futures::future::join_all(projectors).await {
            if let Err(e) = result {
                warn!(error = %e, "Projector task failed");
            }
        }
        debug!("Change feed drained");
    }

    /// Flush now, outside the schedule.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.scheduler.try_flush().await
    }

    /// Stop subscriptions and the scheduler, bounded by the configured timeout.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        self.shutdown_within(self.flush.shutdown_timeout()).await
    }

    /// Stop consuming events, let in-flight work finish until `timeout`,
    /// then abort whatever is left.
    pub async fn shutdown_within(&mut self, timeout: Duration) -> ShutdownReport {
        let mut report = ShutdownReport {
            final_flush: None,
            timed_out: false,
        };
        let Some(mut running) = self.running.take() else {
            return report;
        };
        let deadline = Instant::now() + timeout;
        info!(timeout_ms = timeout.as_millis() as u64, "Shutting down indexing engine");

        for subscription in &running.subscriptions {
            subscription.stop();
        }
        let joined = tokio::time::timeout_at(
            deadline,
            futures::future::join_all(running.projectors.iter_mut()),
        )
        .await;
        if joined.is_err() {
            warn!("Projectors did not stop in time, aborting");
            report.timed_out = true;
            for task in &running.projectors {
                task.abort();
            }
        }

        running.cancel.cancel();
        if tokio::time::timeout_at(deadline, &mut running.scheduler)
            .await
            .is_err()
        {
            warn!("In-flight flush did not finish in time, aborting");
            report.timed_out = true;
            running.scheduler.abort();
        }

        if self.flush.flush_on_shutdown && !report.timed_out {
            match tokio::time::timeout_at(deadline, self.scheduler.try_flush()).await {
                Ok(outcome) => report.final_flush = Some(outcome),
                Err(_) => {
                    warn!("Final flush did not finish in time");
                    report.timed_out = true;
                }
            }
        }

        let stats = self.stats();
        info!(
            pending = stats.queue.dirty,
            flushes = stats.flush.flushes,
            written = stats.flush.documents_written,
            timed_out = report.timed_out,
            "Indexing engine stopped"
        );
        report
    }

    pub fn queue(&self) -> &Arc<PendingIndexStore> {
        &self.queue
    }

    pub fn client(&self) -> &Arc<BulkIndexClient> {
        &self.client
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            queue: self.queue.stats(),
            projector: self.projector.stats(),
            flush: self.scheduler.stats(),
        }
    }
}
