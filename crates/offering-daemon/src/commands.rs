//! Command implementations for the offering indexer.
//!
//! Handles:
//! - run: Load config, open marker storage, consume events until shutdown
//! - init-index: Create the search index if missing
//! - health: Report cluster health and index state
//! - stats: Report marker database statistics

use std::fs;
use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::signal;
use tracing::{info, warn};

use offering_indexing::{ChannelFeed, IndexingEngine, ShutdownReport};
use offering_search::{BulkIndexClient, ElasticsearchTransport, SearchTransport};
use offering_storage::{MarkerStore, Storage};
use offering_types::Settings;

use crate::cli::Overrides;
use crate::input::pump_events;

/// Load layered settings and apply CLI overrides on top.
pub fn load_settings(config_path: Option<&str>, overrides: &Overrides) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    overrides.apply(&mut settings);
    settings.validate().context("Invalid configuration")?;
    Ok(settings)
}

fn init_tracing(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn open_storage(settings: &Settings) -> Result<Storage> {
    let db_path = settings.expanded_db_path();
    info!("Opening marker storage at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    Storage::open(&db_path).context("Failed to open marker storage")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Run the indexer until a shutdown signal (or end of input with `exit_on_eof`).
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Open RocksDB marker storage
/// 3. Ensure the search index exists
/// 4. Project events from `input` (stdin when absent or "-")
/// 5. Shut down gracefully on SIGINT/SIGTERM
pub async fn run_indexer(
    config_path: Option<&str>,
    overrides: &Overrides,
    input: Option<&str>,
    exit_on_eof: bool,
) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    info!("Offering indexer starting...");
    info!("Configuration:");
    info!("  Database path: {}", settings.db_path);
    info!("  Search store: {}", settings.search.url);
    info!("  Index: {}", settings.search.index);
    info!("  Flush interval: {}ms", settings.flush.interval_ms);
    info!("  Initial index mode: {:?}", settings.initial_index_mode);

    let storage = Arc::new(open_storage(&settings)?);
    let client = Arc::new(
        BulkIndexClient::from_settings(&settings).context("Failed to create search client")?,
    );

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match input {
        None | Some("-") => {
            info!("Reading change events from stdin");
            Box::new(BufReader::new(tokio::io::stdin()))
        }
        Some(path) => {
            info!("Reading change events from {}", path);
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input {}", path))?;
            Box::new(BufReader::new(file))
        }
    };

    let report = serve(
        &settings,
        client,
        storage.clone(),
        reader,
        exit_on_eof,
        shutdown_signal(),
    )
    .await?;

    if report.timed_out {
        warn!("Shutdown timed out, some updates stay unindexed until redelivery");
    }
    storage.flush().context("Failed to flush marker storage")?;
    info!("Offering indexer stopped");
    Ok(())
}

/// Drive an engine from a line-delimited event stream.
///
/// Returns after `shutdown` resolves, or after the input ends and every
/// event has been projected when `exit_on_eof` is set.
pub async fn serve<R, S>(
    settings: &Settings,
    client: Arc<BulkIndexClient>,
    markers: Arc<dyn MarkerStore>,
    reader: R,
    exit_on_eof: bool,
    shutdown: S,
) -> Result<ShutdownReport>
where
    R: AsyncBufRead + Unpin + Send + 'static,
    S: Future<Output = ()>,
{
    let mut engine = IndexingEngine::from_settings(client, markers, settings);
    engine
        .initialize()
        .await
        .context("Failed to initialize search index")?;

    let feed = Arc::new(ChannelFeed::default());
    engine
        .start(feed.as_ref())
        .context("Failed to start indexing engine")?;

    let mut pump = {
        let feed = feed.clone();
        tokio::spawn(async move { pump_events(reader, &feed).await })
    };

    tokio::select! {
        _ = shutdown => {
            pump.abort();
        }
        result = &mut pump, if exit_on_eof => {
            match result {
                Ok(Ok(stats)) => info!(
                    lines = stats.lines,
                    published = stats.published,
                    malformed = stats.malformed,
                    "Input exhausted"
                ),
                Ok(Err(e)) => warn!(error = %e, "Input failed"),
                Err(e) => warn!(error = %e, "Input task failed"),
            }
            feed.close();
            engine.wait_for_feed_end().await;
        }
    }

    let report = engine.shutdown().await;
    if let Some(outcome) = &report.final_flush {
        info!(?outcome, "Final flush");
    }
    Ok(report)
}

/// Create the index with the expected mappings, or verify an existing one.
pub async fn init_index(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    init_tracing(&settings.log_level)?;

    let client =
        BulkIndexClient::from_settings(&settings).context("Failed to create search client")?;
    client
        .initialize()
        .await
        .context("Failed to initialize search index")?;

    println!("Index '{}' ready at {}", client.index(), settings.search.url);
    Ok(())
}

/// Print cluster health and the index's read-only state.
pub async fn show_health(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    let transport = ElasticsearchTransport::from_settings(&settings.search)
        .context("Failed to create search client")?;
    let index = &settings.search.index;

    let health = transport
        .cluster_health()
        .await
        .context("Failed to read cluster health")?;
    println!("Search store: {}", settings.search.url);
    println!("Cluster status: {}", health.status);
    println!("Active shards: {}", health.active_shards);
    println!("Unassigned shards: {}", health.unassigned_shards);

    if transport
        .index_exists(index)
        .await
        .context("Failed to check index")?
    {
        let read_only = transport
            .read_only_block(index)
            .await
            .context("Failed to read index settings")?;
        println!("Index '{}': present", index);
        println!("Read-only block: {}", if read_only { "set" } else { "clear" });
    } else {
        println!("Index '{}': missing (run init-index)", index);
    }
    Ok(())
}

/// Print marker database statistics.
pub fn show_stats(config_path: Option<&str>, overrides: &Overrides) -> Result<()> {
    let settings = load_settings(config_path, overrides)?;
    let db_path = settings.expanded_db_path();
    let storage = Storage::open(&db_path).context("Failed to open marker storage")?;
    let stats = storage.get_stats().context("Failed to read storage stats")?;

    println!("Marker database: {:?}", db_path);
    println!("Markers: {}", stats.marker_count);
    println!("Tombstones: {}", stats.tombstone_count);
    println!("Disk usage: {} bytes", stats.disk_usage_bytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use offering_indexing::FlushOutcome;
    use offering_search::mock::MockTransport;
    use offering_search::RetryPolicy;
    use offering_storage::InMemoryMarkerStore;
    use offering_types::{ChangeEvent, Course, Offering, Semester, TBA};
    use std::io::Cursor;
    use std::time::Duration;
    use uuid::Uuid;

    fn client(mock: Arc<MockTransport>) -> Arc<BulkIndexClient> {
        Arc::new(BulkIndexClient::new(
            mock,
            "offerings",
            RetryPolicy::new(3, Duration::from_millis(10)),
        ))
    }

    fn events(events: &[ChangeEvent]) -> Cursor<Vec<u8>> {
        let mut buf = String::new();
        for event in events {
            buf.push_str(&serde_json::to_string(event).unwrap());
            buf.push('\n');
        }
        Cursor::new(buf.into_bytes())
    }

    #[test]
    fn test_load_settings_applies_overrides() {
        let overrides = Overrides {
            index: Some("courses".into()),
            ..Default::default()
        }
        .with_db_path(Some("/tmp/offering-markers".into()));

        let settings = load_settings(None, &overrides).unwrap();
        assert_eq!(settings.search.index, "courses");
        assert_eq!(settings.db_path, "/tmp/offering-markers");
    }

    #[test]
    fn test_load_settings_rejects_empty_index() {
        let overrides = Overrides {
            index: Some("  ".into()),
            ..Default::default()
        };
        assert!(load_settings(None, &overrides).is_err());
    }

    #[test]
    fn test_show_stats_on_fresh_database() {
        let dir = tempfile::tempdir().unwrap();
        let overrides =
            Overrides::default().with_db_path(Some(dir.path().to_string_lossy().to_string()));
        assert!(show_stats(None, &overrides).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_until_end_of_input() {
        let mock = Arc::new(MockTransport::new());
        let markers = Arc::new(InMemoryMarkerStore::new());
        let offerings: Vec<Offering> = ["CS 101", "CS 102"]
            .into_iter()
            .map(|code| {
                Offering::new(
                    Course::new(code, "Intro"),
                    Semester::new(2022, "Spring"),
                    Uuid::new_v4(),
                )
            })
            .collect();
        let reader = events(
            &offerings
                .iter()
                .map(|o| ChangeEvent::OfferingCreated { offering: o.clone() })
                .collect::<Vec<_>>(),
        );

        let report = serve(
            &Settings::default(),
            client(mock.clone()),
            markers.clone(),
            reader,
            true,
            std::future::pending(),
        )
        .await
        .unwrap();

        assert!(!report.timed_out);
        assert!(mock.has_index("offerings"));
        for o in &offerings {
            let doc = mock.document(o.record_id().as_str()).unwrap();
            assert_eq!(doc.days, TBA);
            assert_eq!(doc.time, TBA);
        }
        assert_eq!(markers.marker_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_stops_on_shutdown_signal() {
        let mock = Arc::new(MockTransport::new().with_index("offerings"));

        let report = serve(
            &Settings::default(),
            client(mock.clone()),
            Arc::new(InMemoryMarkerStore::new()),
            tokio::io::empty(),
            false,
            async {},
        )
        .await
        .unwrap();

        assert_eq!(report.final_flush, Some(FlushOutcome::Idle));
        assert_eq!(mock.calls().bulk_upsert, 0);
    }
}
