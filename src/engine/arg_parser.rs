use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::config::PackagePaths;
use crate::{DiscoveryMode, GatingPolicy};

/// Continuously batch new files or time segments and hand each batch to a command exactly once.
#[derive(Clone, Parser)]
#[command(name = "shakeflow")]
#[command(about = "Watch for new units of work and dispatch them in batches to a command.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file. Default: `.shakeflow.toml` in the current directory (skipped if absent).
    #[arg(long, short = 'C', global = true)]
    pub config: Option<PathBuf>,

    /// Units per batch.
    #[arg(long, short = 'n', global = true)]
    pub batch_size: Option<usize>,

    /// Milliseconds between dispatch checks.
    #[arg(long, short = 'p', global = true)]
    pub poll_interval_ms: Option<u64>,

    /// When to fire: `full` waits for a whole batch, `ready` fires on one unit.
    /// Default: `full` for files, `ready` for times.
    #[arg(long, short = 'g', global = true, value_enum)]
    pub gating: Option<GatingPolicy>,

    /// On Ctrl+C, dispatch leftover units (partial batches included) before exiting.
    #[arg(long, global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub drain_on_stop: Option<bool>,

    /// Append log records to this file instead of stderr.
    #[arg(long, short = 'o', global = true)]
    pub log_file: Option<PathBuf>,

    /// Verbose output.
    #[arg(long, short = 'v', global = true, num_args = 0..=1, default_missing_value = "true", value_parser = clap::value_parser!(bool))]
    pub verbose: Option<bool>,
}

#[derive(Clone, Subcommand)]
pub enum Commands {
    /// Batch files created under a directory tree.
    Files(FilesArgs),
    /// Batch fixed-length time segments once each is complete.
    Times(TimesArgs),
}

#[derive(Clone, Args)]
pub struct FilesArgs {
    /// Directory to watch (recursive). Default: current directory.
    #[arg(value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Only paths ending with this suffix are units.
    #[arg(long, short = 's')]
    pub suffix: Option<String>,

    /// `from_origin` includes files already present; `from_now` only new ones.
    #[arg(long, short = 'm', value_enum)]
    pub mode: Option<DiscoveryMode>,

    /// Command run per batch; file paths are appended as arguments.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Clone, Args)]
pub struct TimesArgs {
    /// First segment start (RFC 3339). Default: current segment aligned to the interval.
    #[arg(long, conflicts_with = "start_ago")]
    pub start: Option<DateTime<Utc>>,

    /// First segment start as seconds before now.
    #[arg(long)]
    pub start_ago: Option<i64>,

    /// Segment length in seconds.
    #[arg(long, short = 'i')]
    pub interval: Option<i64>,

    /// Seconds to wait past a segment's end before it is complete.
    #[arg(long, short = 'l')]
    pub lag: Option<i64>,

    /// Milliseconds between segment clock checks.
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Command run per batch; segment starts are appended as RFC 3339 arguments.
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

impl Cli {
    /// Config path, defaulting to the package config filename in the working directory.
    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| PathBuf::from(PackagePaths::get().config_filename()))
    }
}
