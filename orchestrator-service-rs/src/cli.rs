//! Command line of the `terrafix` binary.
//!
//! Without a subcommand the binary runs the polling service. The other
//! subcommands are one-shot operator tools against the same configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Parser)]
#[command(name = "terrafix", version, about = "Compliance failure remediation service")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Poll for failures and remediate them until interrupted (default)
    Run,

    /// Run the pipeline once for a failure read from a JSON file
    ProcessOnce {
        /// Path to a JSON document describing one failure
        #[arg(long)]
        failure_json: PathBuf,
    },

    /// Print claim counts by status
    Stats,

    /// Remove claims older than the retention window
    Cleanup {
        /// Days to keep; defaults to the configured retention
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        retention_days: Option<u64>,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}

/// `days` as a duration, or `fallback` when not given.
pub fn retention(days: Option<u64>, fallback: Duration) -> Duration {
    days.map(|d| Duration::from_secs(d * SECS_PER_DAY))
        .unwrap_or(fallback)
}
