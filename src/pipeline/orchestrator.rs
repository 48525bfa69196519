use anyhow::{Context, Result};
use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::task::Task;
use crate::engine::tools::align_down;
use crate::source::{DirectoryUnitSource, IntervalUnitSource, UnitSource};
use crate::{DispatchOpts, DispatchSummary, Opts, Outcome};

use super::dispatcher::Dispatcher;

/// Start `source`, dispatch its units to `task` until `cancel` is set (or the source faults),
/// then stop and join the producer. The producer is always joined, even when dispatch fails.
pub fn run_pipeline<S, T, F>(
    mut source: S,
    task: T,
    opts: &DispatchOpts,
    cancel: &AtomicBool,
    on_outcome: F,
) -> Result<DispatchSummary>
where
    S: UnitSource,
    T: Task<S::Unit>,
    F: FnMut(&Outcome<S::Unit>),
{
    let mut dispatcher = Dispatcher::for_source(&source, task, opts.clone())?;
    source.start().context("start unit source")?;

    let result = dispatcher.run(cancel, on_outcome);

    shutdown_source(&mut source)?;
    result
}

/// Stop the producer and wait for its thread to exit.
pub fn shutdown_source<S: UnitSource>(source: &mut S) -> Result<()> {
    source.stop();
    source.join().context("join unit source")?;
    debug!("unit source shut down");
    Ok(())
}

/// Shared cancel flag set by Ctrl+C. Checked by the dispatcher between polls.
pub fn install_ctrlc_handler() -> Result<Arc<AtomicBool>> {
    let cancel_requested = Arc::new(AtomicBool::new(false));
    let cancel_requested_handler = Arc::clone(&cancel_requested);
    ctrlc::set_handler(move || {
        if cancel_requested_handler.swap(true, Ordering::Relaxed) {
            return;
        }
        info!("Stop requested (Ctrl+C); finishing the current batch...");
    })
    .context("set Ctrl+C handler")?;
    Ok(cancel_requested)
}

pub fn build_directory_source(opts: &Opts) -> Result<DirectoryUnitSource> {
    DirectoryUnitSource::new(&opts.root, opts.mode, opts.suffix.clone())
        .with_context(|| format!("watch {}", opts.root.display()))
}

/// Interval source from opts; without a configured start, the current segment aligned to the
/// interval.
pub fn build_interval_source(opts: &Opts) -> Result<IntervalUnitSource> {
    let start = opts
        .start
        .unwrap_or_else(|| align_down(Utc::now(), opts.interval));
    let source = IntervalUnitSource::new(start, opts.interval, opts.lag)
        .context("configure time segments")?
        .with_tick(opts.tick);
    Ok(source)
}
