//! CLI argument parsing for the offering indexer.
//!
//! CLI flags override every other config source.

use clap::{Parser, Subcommand, ValueEnum};

use offering_types::{InitialIndexMode, Settings};

/// Offering Indexer
///
/// Projects offering change events into a full-text search index.
#[derive(Parser, Debug)]
#[command(name = "offering-indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/offering-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override search store URL
    #[arg(long, global = true)]
    pub search_url: Option<String>,

    /// Override index name
    #[arg(long, global = true)]
    pub index: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Indexer commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume change events and keep the index in sync
    Run {
        /// File with one JSON change event per line ("-" or absent reads stdin)
        #[arg(short, long)]
        input: Option<String>,

        /// Shut down once the input is exhausted
        #[arg(long)]
        exit_on_eof: bool,

        /// Override marker database path
        #[arg(long)]
        db_path: Option<String>,

        /// How new offerings get their first document
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
    },

    /// Create the search index with its mappings if missing
    InitIndex,

    /// Show search cluster health and index state
    Health,

    /// Show marker database statistics
    Stats {
        /// Override marker database path
        #[arg(long)]
        db_path: Option<String>,
    },
}

/// CLI spelling of [`InitialIndexMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Batched,
    Direct,
}

impl From<ModeArg> for InitialIndexMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Batched => InitialIndexMode::Batched,
            ModeArg::Direct => InitialIndexMode::Direct,
        }
    }
}

/// Settings overrides collected from CLI flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides {
    pub log_level: Option<String>,
    pub search_url: Option<String>,
    pub index: Option<String>,
    pub db_path: Option<String>,
    pub mode: Option<ModeArg>,
}

impl Overrides {
    pub fn with_db_path(mut self, db_path: Option<String>) -> Self {
        if db_path.is_some() {
            self.db_path = db_path;
        }
        self
    }

    pub fn with_mode(mut self, mode: Option<ModeArg>) -> Self {
        if mode.is_some() {
            self.mode = mode;
        }
        self
    }

    /// Apply on top of loaded settings.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(level) = &self.log_level {
            settings.log_level = level.clone();
        }
        if let Some(url) = &self.search_url {
            settings.search.url = url.clone();
        }
        if let Some(index) = &self.index {
            settings.search.index = index.clone();
        }
        if let Some(db_path) = &self.db_path {
            settings.db_path = db_path.clone();
        }
        if let Some(mode) = self.mode {
            settings.initial_index_mode = mode.into();
        }
    }
}

impl Cli {
    /// Overrides from the global flags.
    pub fn overrides(&self) -> Overrides {
        Overrides {
            log_level: self.log_level.clone(),
            search_url: self.search_url.clone(),
            index: self.index.clone(),
            ..Default::default()
        }
    }
}
