//! Shakeflow: unattended batch dispatch over files or time segments as they become available.
//!
//! A [`UnitSource`](source::UnitSource) thread appends units to a shared
//! [`DiscoveredSet`](source::DiscoveredSet); a [`Dispatcher`](pipeline::Dispatcher) polls it,
//! selects the smallest unfinished units with [`next_batch`](engine::next_batch), and invokes a
//! [`Task`](engine::Task) once per batch. Every dispatched unit is marked finished whether the
//! task succeeds, fails or panics, so nothing is processed twice and a failure never stalls the
//! stream.

pub mod engine;
pub mod pipeline;
pub mod source;
pub mod types;
pub mod utils;

/// Re-export types for API
pub use types::*;

pub use engine::{CommandTask, Task, next_batch};
pub use pipeline::{DispatchState, Dispatcher};
pub use source::{DirectoryUnitSource, IntervalUnitSource, SourceError, UnitSource};

use chrono::{DateTime, TimeDelta, Utc};
use log::debug;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

/// Result alias used by public shakeflow API
pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, Error>;

/// Watch `root` for files ending in `suffix` and dispatch them to `task` until `cancel` is set.
///
/// - **`mode`**: [`DiscoveryMode::FromOrigin`] also dispatches files already present.
/// - **`on_outcome`**: sees each [`Outcome`] as it is produced; keep it fast.
///
/// ```ignore
/// let cancel = AtomicBool::new(false);
/// let opts = DispatchOpts::new(2, GatingPolicy::Full);
/// shakeflow::watch_dir("database", DiscoveryMode::FromOrigin, ".h5",
///     |files: &[PathBuf]| stack(files), &opts, &cancel, |_| {})?;
/// ```
pub fn watch_dir<T, F>(
    root: impl AsRef<Path>,
    mode: DiscoveryMode,
    suffix: &str,
    task: T,
    opts: &DispatchOpts,
    cancel: &AtomicBool,
    on_outcome: F,
) -> Result<DispatchSummary>
where
    T: Task<PathBuf>,
    F: FnMut(&Outcome<PathBuf>),
{
    debug_config(opts);
    let source = DirectoryUnitSource::new(root, mode, suffix)?;
    pipeline::run_pipeline(source, task, opts, cancel, on_outcome)
}

/// Dispatch `interval`-long segments starting at `start`, each once it is older than `lag`.
/// Units are segment start times.
pub fn watch_times<T, F>(
    start: DateTime<Utc>,
    interval: TimeDelta,
    lag: TimeDelta,
    task: T,
    opts: &DispatchOpts,
    cancel: &AtomicBool,
    on_outcome: F,
) -> Result<DispatchSummary>
where
    T: Task<DateTime<Utc>>,
    F: FnMut(&Outcome<DateTime<Utc>>),
{
    debug_config(opts);
    let source = IntervalUnitSource::new(start, interval, lag)?;
    pipeline::run_pipeline(source, task, opts, cancel, on_outcome)
}

fn debug_config(opts: &DispatchOpts) {
    debug!(
        "{} CONFIG:{:#?}",
        env!("CARGO_PKG_NAME").to_string().to_uppercase(),
        opts
    );
}
