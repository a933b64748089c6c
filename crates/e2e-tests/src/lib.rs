//! End-to-end test infrastructure for the offering indexer.
//!
//! Provides a shared TestHarness wiring a RocksDB marker store, an
//! in-memory search store and a running indexing engine, plus helpers
//! for building change events.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use offering_indexing::{ChannelFeed, IndexingEngine};
use offering_search::mock::MockTransport;
use offering_search::{BulkIndexClient, RetryPolicy};
use offering_storage::Storage;
use offering_types::{
    AttributeValue, ChangeEvent, Course, FlushSettings, InitialIndexMode, Offering, Semester,
};

/// Flush interval used by every harness.
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Shared test harness for E2E tests.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    /// Marker database location, reused across restarts
    pub db_path: PathBuf,
    pub storage: Arc<Storage>,
    pub mock: Arc<MockTransport>,
    pub feed: ChannelFeed,
    pub engine: IndexingEngine,
    mode: InitialIndexMode,
}

impl TestHarness {
    /// Batched engine over an empty search store.
    pub async fn start() -> Self {
        Self::start_with(MockTransport::new(), InitialIndexMode::Batched).await
    }

    pub async fn start_with(mock: MockTransport, mode: InitialIndexMode) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("markers");
        Self::open(temp_dir, db_path, Arc::new(mock), mode).await
    }

    async fn open(
        temp_dir: tempfile::TempDir,
        db_path: PathBuf,
        mock: Arc<MockTransport>,
        mode: InitialIndexMode,
    ) -> Self {
        let storage = Arc::new(Storage::open(&db_path).expect("Failed to open test storage"));
        let client = Arc::new(BulkIndexClient::new(
            mock.clone(),
            "offerings",
            RetryPolicy::new(3, Duration::from_millis(10)),
        ));
        let mut engine = IndexingEngine::new(
            client,
            storage.clone(),
            FlushSettings {
                interval_ms: FLUSH_INTERVAL.as_millis() as u64,
                shutdown_timeout_secs: 30,
                flush_on_shutdown: true,
            },
            mode,
        );
        engine
            .initialize()
            .await
            .expect("Failed to initialize index");

        let feed = ChannelFeed::default();
        engine.start(&feed).expect("Failed to start engine");

        Self {
            _temp_dir: temp_dir,
            db_path,
            storage,
            mock,
            feed,
            engine,
            mode,
        }
    }

    /// Shut the engine down and bring up a fresh one on the same marker
    /// database and search store.
    pub async fn restart(mut self) -> Self {
        self.engine.shutdown().await;
        let TestHarness {
            _temp_dir,
            db_path,
            storage,
            mock,
            feed,
            engine,
            mode,
        } = self;
        drop(engine);
        drop(feed);
        storage.flush().expect("Failed to flush storage");
        drop(storage);

        Self::open(_temp_dir, db_path, mock, mode).await
    }

    /// Publish and let the projectors catch up.
    pub async fn publish(&self, event: ChangeEvent) {
        self.feed.publish(event).await;
        settle().await;
    }

    pub async fn publish_all(&self, events: impl IntoIterator<Item = ChangeEvent>) {
        for event in events {
            self.publish(event).await;
        }
    }

    /// Sleep past the next flush tick.
    pub async fn wait_for_flush(&self) {
        tokio::time::sleep(FLUSH_INTERVAL + Duration::from_secs(1)).await;
        settle().await;
    }
}

/// Yield until spawned tasks have run.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// A Spring 2022 offering with a fresh guid.
pub fn offering(code: &str, name: &str) -> Offering {
    Offering::new(
        Course::new(code, name),
        Semester::new(2022, "Spring"),
        Uuid::new_v4(),
    )
}

pub fn created(offering: &Offering) -> ChangeEvent {
    ChangeEvent::OfferingCreated {
        offering: offering.clone(),
    }
}

pub fn updated(offering: &Offering, value: AttributeValue) -> ChangeEvent {
    ChangeEvent::updated(offering.clone(), value)
}

/// An update replacing the value set by `prior`.
pub fn superseding(prior: &ChangeEvent, value: AttributeValue) -> ChangeEvent {
    ChangeEvent::superseding(prior, value)
}

pub fn deleted(offering: &Offering) -> ChangeEvent {
    ChangeEvent::OfferingDeleted {
        offering: offering.clone(),
    }
}

const DAYS: [&str; 4] = ["MWF", "TR", "MF", "W"];
const TIMES: [&str; 4] = ["08:00", "10:00", "13:30", "15:00"];
const BUILDINGS: [&str; 3] = ["Science Hall", "Library", "Engineering"];
const INSTRUCTORS: [&str; 3] = ["Dr. Smith", "Prof. Jones", "Dr. Lee"];

/// A random attribute value of any kind.
pub fn random_attribute<R: Rng>(rng: &mut R) -> AttributeValue {
    match rng.random_range(0..3) {
        0 => AttributeValue::time(
            DAYS[rng.random_range(0..DAYS.len())],
            TIMES[rng.random_range(0..TIMES.len())],
        ),
        1 => AttributeValue::location(
            BUILDINGS[rng.random_range(0..BUILDINGS.len())],
            rng.random_range(100..400).to_string(),
        ),
        _ => AttributeValue::instructor(INSTRUCTORS[rng.random_range(0..INSTRUCTORS.len())]),
    }
}

/// `count` attribute updates spread randomly over `offerings`.
pub fn random_updates<R: Rng>(
    rng: &mut R,
    offerings: &[Offering],
    count: usize,
) -> Vec<ChangeEvent> {
    (0..count)
        .map(|_| {
            let offering = &offerings[rng.random_range(0..offerings.len())];
            updated(offering, random_attribute(rng))
        })
        .collect()
}
