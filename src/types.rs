//! Public and internal types for the shakeflow API and pipeline.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::source::SourceError;
use crate::utils::config::{DispatchDefaults, IntervalDefaults};

/// Where a [`DirectoryUnitSource`](crate::source::DirectoryUnitSource) starts discovering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMode {
    /// Seed with every matching file already under the root, then watch.
    #[default]
    #[value(name = "from_origin")]
    FromOrigin,
    /// Ignore existing files; only files created after `start()` count.
    #[value(name = "from_now")]
    FromNow,
}

impl FromStr for DiscoveryMode {
    type Err = SourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "from_origin" => Ok(Self::FromOrigin),
            "from_now" => Ok(Self::FromNow),
            other => Err(SourceError::InvalidArgument(format!(
                "mode must be 'from_origin' or 'from_now', got '{other}'"
            ))),
        }
    }
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FromOrigin => f.write_str("from_origin"),
            Self::FromNow => f.write_str("from_now"),
        }
    }
}

/// Rule deciding when enough units have accumulated to dispatch a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GatingPolicy {
    /// Wait until at least `batch_size` unfinished units exist. Partial batches never fire.
    Full,
    /// Fire as soon as one unit is ready, taking up to `batch_size`.
    Ready,
}

impl GatingPolicy {
    pub fn is_satisfied(self, available: usize, batch_size: usize) -> bool {
        match self {
            Self::Full => available >= batch_size.max(1),
            Self::Ready => available >= 1,
        }
    }
}

impl fmt::Display for GatingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Ready => f.write_str("ready"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Record of one task invocation. Every dispatched batch yields exactly one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Outcome<U> {
    pub batch: Vec<U>,
    pub status: OutcomeStatus,
    /// Error chain or panic message when `status` is `Failure`.
    pub diagnostic: Option<String>,
}

impl<U> Outcome<U> {
    pub fn success(batch: Vec<U>) -> Self {
        Self {
            batch,
            status: OutcomeStatus::Success,
            diagnostic: None,
        }
    }

    pub fn failure(batch: Vec<U>, diagnostic: String) -> Self {
        Self {
            batch,
            status: OutcomeStatus::Failure,
            diagnostic: Some(diagnostic),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Totals returned by [`Dispatcher::run`](crate::pipeline::Dispatcher::run).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub batches: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units handed to the task, successful or not.
    pub units: usize,
}

impl DispatchSummary {
    pub fn record<U>(&mut self, outcome: &Outcome<U>) {
        self.batches += 1;
        self.units += outcome.batch.len();
        match outcome.status {
            OutcomeStatus::Success => self.succeeded += 1,
            OutcomeStatus::Failure => self.failed += 1,
        }
    }
}

/// Lib-only options for a [`Dispatcher`](crate::pipeline::Dispatcher). Fixed at construction.
#[derive(Clone, Debug)]
pub struct DispatchOpts {
    /// Maximum units per task invocation. Must be at least 1.
    pub batch_size: usize,
    /// Sleep between gating checks.
    pub poll_interval: Duration,
    pub gating: GatingPolicy,
    /// On cancellation, hand any leftover units to the task before returning (ignores gating).
    pub drain_on_stop: bool,
}

impl DispatchOpts {
    pub fn new(batch_size: usize, gating: GatingPolicy) -> Self {
        Self {
            batch_size,
            gating,
            ..Self::default()
        }
    }
}

impl Default for DispatchOpts {
    fn default() -> Self {
        Self {
            batch_size: DispatchDefaults::BATCH_SIZE,
            poll_interval: Duration::from_millis(DispatchDefaults::POLL_INTERVAL_MS),
            gating: GatingPolicy::Full,
            drain_on_stop: false,
        }
    }
}

/// Full options (CLI + `.shakeflow.toml`). Use [`DispatchOpts`] for lib.
#[derive(Clone, Debug)]
pub struct Opts {
    pub batch_size: usize,
    pub poll_interval: Duration,
    /// When None, the source's default applies (`full` for files, `ready` for times).
    pub gating: Option<GatingPolicy>,
    pub drain_on_stop: bool,
    /// Debug-level logging for this crate.
    pub verbose: bool,
    /// Append log records here instead of stderr.
    pub log_file: Option<PathBuf>,
    /// Program and leading args; units are appended per batch.
    pub command: Vec<String>,
    /// Directory to watch (`files`).
    pub root: PathBuf,
    /// File name suffix filter (`files`).
    pub suffix: String,
    pub mode: DiscoveryMode,
    /// First segment start (`times`). When None, the current segment aligned to `interval`.
    pub start: Option<DateTime<Utc>>,
    /// Segment length (`times`).
    pub interval: TimeDelta,
    /// Extra wait past a segment's end before it counts as complete (`times`).
    pub lag: TimeDelta,
    /// Producer wake-up cadence (`times`).
    pub tick: Duration,
}

impl Default for Opts {
    fn default() -> Self {
        let dispatch = DispatchOpts::default();
        Self {
            batch_size: dispatch.batch_size,
            poll_interval: dispatch.poll_interval,
            gating: None,
            drain_on_stop: dispatch.drain_on_stop,
            verbose: false,
            log_file: None,
            command: Vec::new(),
            root: PathBuf::from("."),
            suffix: DispatchDefaults::SUFFIX.to_string(),
            mode: DiscoveryMode::default(),
            start: None,
            interval: TimeDelta::seconds(IntervalDefaults::INTERVAL_SECS),
            lag: TimeDelta::seconds(IntervalDefaults::LAG_SECS),
            tick: Duration::from_millis(IntervalDefaults::TICK_MS),
        }
    }
}

impl Opts {
    /// Dispatcher options, using `default_gating` when none was configured.
    pub fn dispatch_opts(&self, default_gating: GatingPolicy) -> DispatchOpts {
        DispatchOpts {
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            gating: self.gating.unwrap_or(default_gating),
            drain_on_stop: self.drain_on_stop,
        }
    }
}
