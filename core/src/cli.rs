use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::tasks::TaskKind;

/// Command line interface for the retention sweeper.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: Overrides,
    #[command(subcommand)]
    pub command: Command,
}

/// Settings that take precedence over the config file and environment.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    /// Path to configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    /// JSON snapshot file backing the document store.
    #[arg(long, global = true)]
    pub data_file: Option<PathBuf>,
    /// Seconds between scheduled sweeps.
    #[arg(long, global = true)]
    pub interval_secs: Option<u64>,
    /// Documents per batch.
    #[arg(long, global = true)]
    pub batch_size: Option<usize>,
    /// Log filter directive, e.g. `info` or `sweepcore=debug`.
    #[arg(long, global = true)]
    pub log: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sweep now and then on every interval until Ctrl+C.
    Run,
    /// Run one full sweep and print its report.
    Sweep,
    /// Print how many documents each age policy would remove.
    Stats,
    /// Delete all chat messages, approvals and participants of a club.
    Club {
        /// Club identifier.
        club_id: String,
    },
    /// Run a single cleanup task.
    Task {
        #[arg(value_enum)]
        task: TaskKind,
    },
    /// Load NDJSON records (`{"collection", "id", "fields"}`) into the store.
    Import {
        file: PathBuf,
    },
    /// Write every stored document to stdout as NDJSON records.
    Export,
}
