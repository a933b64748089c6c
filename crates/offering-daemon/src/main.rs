//! Offering Indexer
//!
//! Keeps a search index of course offerings in sync with a change feed.
//!
//! # Usage
//!
//! ```bash
//! offering-indexer run [--input FILE] [--exit-on-eof] [--db-path PATH]
//! offering-indexer init-index
//! offering-indexer health
//! offering-indexer stats [--db-path PATH]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/offering-indexer/config.toml)
//! 3. Environment variables (INDEXER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use offering_daemon::{init_index, run_indexer, show_health, show_stats, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let global = cli.overrides();

    match cli.command {
        Commands::Run {
            input,
            exit_on_eof,
            db_path,
            mode,
        } => {
            let overrides = global.with_db_path(db_path).with_mode(mode);
            run_indexer(cli.config.as_deref(), &overrides, input.as_deref(), exit_on_eof).await?;
        }
        Commands::InitIndex => {
            init_index(cli.config.as_deref(), &global).await?;
        }
        Commands::Health => {
            show_health(cli.config.as_deref(), &global).await?;
        }
        Commands::Stats { db_path } => {
            show_stats(cli.config.as_deref(), &global.with_db_path(db_path))?;
        }
    }

    Ok(())
}
