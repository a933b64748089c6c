//! Offering indexer daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (run, init-index, health, stats)
//! - `input`: Newline-delimited JSON change events

pub mod cli;
pub mod commands;
pub mod input;

pub use cli::{Cli, Commands, ModeArg, Overrides};
pub use commands::{init_index, load_settings, run_indexer, serve, show_health, show_stats};
pub use input::{pump_events, InputError, InputStats};
