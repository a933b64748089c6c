//! Configuration loading for the offering indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at `~/.config/offering-indexer/config.toml`.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::OfferingError;

/// How newly created offerings get their first document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InitialIndexMode {
    /// Queue the offering and let the next flush write it (default)
    #[default]
    Batched,
    /// Write a placeholder document immediately, one request per offering
    Direct,
}

/// Connection to the external search store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Base URL of the Elasticsearch-compatible endpoint
    #[serde(default = "default_search_url")]
    pub url: String,

    /// Target index name
    #[serde(default = "default_index_name")]
    pub index: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "offerings".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            index: default_index_name(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Retry budget for store calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Attempts per operation before reporting failure
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay; the wait after failed attempt n is base * 2^n
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay() -> u64 {
    200
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
        }
    }
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Flush cycle timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushSettings {
    /// Interval between flush ticks while work is pending
    #[serde(default = "default_flush_interval")]
    pub interval_ms: u64,

    /// Upper bound on shutdown, including any in-flight flush
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Run one last flush when shutting down
    #[serde(default = "default_flush_on_shutdown")]
    pub flush_on_shutdown: bool,
}

fn default_flush_interval() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    30
}

fn default_flush_on_shutdown() -> bool {
    true
}

impl Default for FlushSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_flush_interval(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            flush_on_shutdown: default_flush_on_shutdown(),
        }
    }
}

impl FlushSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Path to RocksDB marker storage directory
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub search: SearchSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub flush: FlushSettings,

    #[serde(default)]
    pub initial_index_mode: InitialIndexMode,
}

fn default_db_path() -> String {
    ProjectDirs::from("", "", "offering-indexer")
        .map(|p| p.data_local_dir().join("markers"))
        .unwrap_or_else(|| PathBuf::from("./markers"))
        .to_string_lossy()
        .to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            log_level: default_log_level(),
            search: SearchSettings::default(),
            retry: RetrySettings::default(),
            flush: FlushSettings::default(),
            initial_index_mode: InitialIndexMode::default(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/offering-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (INDEXER_*, nested keys joined by `__`)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, OfferingError> {
        let config_dir = ProjectDirs::from("", "", "offering-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("db_path", default_db_path())
            .map_err(|e| OfferingError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| OfferingError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // e.g. INDEXER_DB_PATH, INDEXER_SEARCH__URL, INDEXER_RETRY__MAX_ATTEMPTS
        builder = builder.add_source(
            Environment::with_prefix("INDEXER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| OfferingError::Config(e.to_string()))?;

        let settings: Settings = config
            .try_deserialize()
            .map_err(|e| OfferingError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), OfferingError> {
        if self.search.url.trim().is_empty() {
            return Err(OfferingError::Config("search.url must not be empty".into()));
        }
        if self.search.index.trim().is_empty() {
            return Err(OfferingError::Config(
                "search.index must not be empty".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(OfferingError::Config(
                "retry.max_attempts must be > 0".into(),
            ));
        }
        if self.flush.interval_ms == 0 {
            return Err(OfferingError::Config("flush.interval_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Expand ~ in db_path to the home directory
    pub fn expanded_db_path(&self) -> PathBuf {
        if let Some(rest) = self.db_path.strip_prefix("~/") {
            if let Some(dirs) = directories::BaseDirs::new() {
                return dirs.home_dir().join(rest);
            }
        }
        PathBuf::from(&self.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.search.url, "http://localhost:9200");
        assert_eq!(settings.search.index, "offerings");
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.retry.base_delay(), Duration::from_millis(200));
        assert_eq!(settings.flush.interval(), Duration::from_secs(5));
        assert!(settings.flush.flush_on_shutdown);
        assert_eq!(settings.initial_index_mode, InitialIndexMode::Batched);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexer.toml");
        std::fs::write(
            &path,
            r#"
db_path = "/tmp/markers"
initial_index_mode = "direct"

[search]
url = "http://search:9200"
index = "courses"

[flush]
interval_ms = 250
"#,
        )
        .unwrap();

        let settings = Settings::load(Some(path.to_str().unwrap())).unwrap();
        assert_eq!(settings.db_path, "/tmp/markers");
        assert_eq!(settings.search.url, "http://search:9200");
        assert_eq!(settings.search.index, "courses");
        assert_eq!(settings.search.request_timeout_secs, 30);
        assert_eq!(settings.flush.interval_ms, 250);
        assert_eq!(settings.retry.max_attempts, 10);
        assert_eq!(settings.initial_index_mode, InitialIndexMode::Direct);
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let mut settings = Settings::default();
        settings.retry.max_attempts = 0;
        assert!(matches!(settings.validate(), Err(OfferingError::Config(_))));

        let mut settings = Settings::default();
        settings.flush.interval_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_expanded_db_path_absolute() {
        let settings = Settings {
            db_path: "/var/lib/indexer".to_string(),
            ..Default::default()
        };
        assert_eq!(settings.expanded_db_path(), PathBuf::from("/var/lib/indexer"));
    }
}
