//! Consumer loop: gate on pending units, pick the next batch, invoke the task once, record the
//! outcome, mark the batch finished no matter how the task ended.

use anyhow::{Result, bail};
use log::{debug, error, info, warn};
use std::any::Any;
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::engine::task::Task;
use crate::engine::tracker::{available, next_batch};
use crate::source::{DiscoveredSet, SourceFault, Unit, UnitSource};
use crate::{DispatchOpts, DispatchSummary, Outcome};

/// Where the dispatcher is in its cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchState {
    /// Waiting for the gating policy to be satisfied.
    Idle,
    /// A task call is in flight.
    Dispatching,
    /// `run` returned. Only ever entered between polls.
    Stopped,
}

/// Hands discovered units to a task in batches, each unit at most once.
pub struct Dispatcher<U, T> {
    discovered: DiscoveredSet<U>,
    fault: SourceFault,
    task: T,
    opts: DispatchOpts,
    finished: BTreeSet<U>,
    summary: DispatchSummary,
    state: DispatchState,
}

impl<U: Unit, T: Task<U>> Dispatcher<U, T> {
    /// Rejects a zero batch size or a zero poll interval.
    pub fn new(discovered: DiscoveredSet<U>, task: T, opts: DispatchOpts) -> Result<Self> {
        if opts.batch_size == 0 {
            bail!("batch size must be at least 1");
        }
        if opts.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        Ok(Self {
            discovered,
            fault: SourceFault::new(),
            task,
            opts,
            finished: BTreeSet::new(),
            summary: DispatchSummary::default(),
            state: DispatchState::Idle,
        })
    }

    /// Dispatcher reading `source`'s discovered set and watching its fault slot.
    pub fn for_source<S>(source: &S, task: T, opts: DispatchOpts) -> Result<Self>
    where
        S: UnitSource<Unit = U>,
    {
        Ok(Self::new(source.discovered(), task, opts)?.with_fault(source.fault()))
    }

    /// Observe `fault` between polls; once set, `run` stops with an error.
    pub fn with_fault(mut self, fault: SourceFault) -> Self {
        self.fault = fault;
        self
    }

    pub fn finished(&self) -> &BTreeSet<U> {
        &self.finished
    }

    pub fn summary(&self) -> DispatchSummary {
        self.summary
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    pub fn opts(&self) -> &DispatchOpts {
        &self.opts
    }

    /// Units discovered but not yet dispatched.
    pub fn pending(&self) -> usize {
        available(self.discovered.len(), self.finished.len())
    }

    /// One gating check. Dispatches at most one batch and returns its outcome.
    pub fn poll_once(&mut self) -> Option<Outcome<U>> {
        if !self
            .opts
            .gating
            .is_satisfied(self.pending(), self.opts.batch_size)
        {
            return None;
        }
        self.dispatch_next()
    }

    /// Dispatch the next batch regardless of gating (may be partial). None when nothing is pending.
    pub fn flush_once(&mut self) -> Option<Outcome<U>> {
        self.dispatch_next()
    }

    fn dispatch_next(&mut self) -> Option<Outcome<U>> {
        let snapshot = self.discovered.snapshot();
        let batch = next_batch(&snapshot, &self.finished, self.opts.batch_size);
        if batch.is_empty() {
            return None;
        }
        Some(self.dispatch(batch))
    }

    fn dispatch(&mut self, batch: Vec<U>) -> Outcome<U> {
        self.state = DispatchState::Dispatching;
        info!("Start: {:?}", batch);

        let task = &mut self.task;
        let result = panic::catch_unwind(AssertUnwindSafe(|| task.invoke(&batch)));

        // Finished regardless of how the task ended: a failing batch is never retried.
        self.finished.extend(batch.iter().cloned());
        self.state = DispatchState::Idle;

        let outcome = match result {
            Ok(Ok(artifact)) => {
                info!("Success: {:?}", batch);
                debug!("artifact: {:?}", artifact);
                Outcome::success(batch)
            }
            Ok(Err(err)) => {
                let diagnostic = format!("{err:?}");
                error!("Error: {:?}\n{}", batch, diagnostic);
                Outcome::failure(batch, diagnostic)
            }
            Err(payload) => {
                let diagnostic = format!("task panicked: {}", panic_message(payload.as_ref()));
                error!("Error: {:?}\n{}", batch, diagnostic);
                Outcome::failure(batch, diagnostic)
            }
        };
        self.summary.record(&outcome);
        outcome
    }

    /// Poll until `cancel` is set, sleeping `poll_interval` before each check.
    ///
    /// `on_outcome` sees every outcome as it is produced. A faulted source ends the run with an
    /// error once no further batch can be dispatched under the gating policy. With
    /// `drain_on_stop`, leftover units are flushed in (possibly partial) batches after
    /// cancellation.
    pub fn run<F>(&mut self, cancel: &AtomicBool, mut on_outcome: F) -> Result<DispatchSummary>
    where
        F: FnMut(&Outcome<U>),
    {
        info!(
            "Dispatching with {} gating, batch size {}, poll every {:?}",
            self.opts.gating, self.opts.batch_size, self.opts.poll_interval
        );
        while !cancel.load(Ordering::Relaxed) {
            thread::sleep(self.opts.poll_interval);
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            if let Some(outcome) = self.poll_once() {
                on_outcome(&outcome);
                continue;
            }
            if let Some(msg) = self.fault.get() {
                self.state = DispatchState::Stopped;
                error!(
                    "Unit source stopped discovering: {}; {} units left pending",
                    msg,
                    self.pending()
                );
                bail!("unit source failed: {msg}");
            }
        }

        if self.opts.drain_on_stop {
            let pending = self.pending();
            if pending > 0 {
                info!("Draining {} pending units before stopping", pending);
            }
            while let Some(outcome) = self.flush_once() {
                on_outcome(&outcome);
            }
        } else if self.pending() > 0 {
            warn!("Stopping with {} units not dispatched", self.pending());
        }

        self.state = DispatchState::Stopped;
        info!(
            "Stopped after {} batches ({} ok, {} failed, {} units)",
            self.summary.batches, self.summary.succeeded, self.summary.failed, self.summary.units
        );
        Ok(self.summary)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}
