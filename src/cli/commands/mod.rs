pub mod logging;

pub use logging::LoggingConfig;

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Append newline-delimited JSON sample packets
    Ingest(IngestCommand),
    /// Run one compaction under the configured retention policy
    Compact,
    /// Compact on a fixed interval until interrupted
    Run,
    /// Show raw and summary table sizes
    Status,
    /// Print the most recently inserted raw samples
    Recent(RecentCommand),
    /// Print all minute summaries
    Summaries,
}

#[derive(Args)]
pub struct IngestCommand {
    /// Read packets from this file instead of stdin
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

#[derive(Args)]
pub struct RecentCommand {
    /// Number of samples to print
    #[arg(short, long, default_value_t = 1000)]
    pub limit: usize,
}
