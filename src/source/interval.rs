//! Virtual-clock source: emits fixed-length segment starts once real time has moved a lag margin
//! past each segment's end.

use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use log::{debug, error, info};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::utils::config::{IntervalDefaults, PackagePaths};

use super::{DiscoveredSet, SourceError, SourceFault, UnitSource};

/// Wall-clock provider, swappable in tests.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = now;
    }

    pub fn advance(&self, by: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock> Clock for Arc<C> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Start of the segment after `cursor` if the segment starting at `cursor` is complete at `now`,
/// i.e. `now > cursor + interval + lag`. None when not yet due or on overflow.
pub fn segment_ready(
    cursor: DateTime<Utc>,
    interval: TimeDelta,
    lag: TimeDelta,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let next = cursor.checked_add_signed(interval)?;
    let due = next.checked_add_signed(lag)?;
    (now > due).then_some(next)
}

/// Discovers segment start times `start, start + interval, ...` as each becomes complete.
pub struct IntervalUnitSource<C: Clock = SystemClock> {
    start: DateTime<Utc>,
    interval: TimeDelta,
    lag: TimeDelta,
    tick: Duration,
    clock: Arc<C>,
    discovered: DiscoveredSet<DateTime<Utc>>,
    fault: SourceFault,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl<C: Clock> std::fmt::Debug for IntervalUnitSource<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalUnitSource")
            .field("start", &self.start)
            .field("interval", &self.interval)
            .field("lag", &self.lag)
            .field("tick", &self.tick)
            .field("discovered", &self.discovered.len())
            .field("running", &self.handle.is_some())
            .finish()
    }
}

impl IntervalUnitSource<SystemClock> {
    pub fn new(
        start: DateTime<Utc>,
        interval: TimeDelta,
        lag: TimeDelta,
    ) -> Result<Self, SourceError> {
        Self::with_clock(start, interval, lag, SystemClock)
    }
}

impl<C: Clock> IntervalUnitSource<C> {
    /// Discovered set starts as `{start}`. `interval` must be positive, `lag` non-negative.
    pub fn with_clock(
        start: DateTime<Utc>,
        interval: TimeDelta,
        lag: TimeDelta,
        clock: C,
    ) -> Result<Self, SourceError> {
        if interval <= TimeDelta::zero() {
            return Err(SourceError::InvalidArgument(format!(
                "interval must be positive, got {interval}"
            )));
        }
        if lag < TimeDelta::zero() {
            return Err(SourceError::InvalidArgument(format!(
                "lag must not be negative, got {lag}"
            )));
        }
        Ok(Self {
            start,
            interval,
            lag,
            tick: Duration::from_millis(IntervalDefaults::TICK_MS),
            clock: Arc::new(clock),
            discovered: DiscoveredSet::from_units(vec![start]),
            fault: SourceFault::new(),
            stop_tx: None,
            handle: None,
        })
    }

    /// Producer wake-up cadence. Discovery latency is at most one tick.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    pub fn lag(&self) -> TimeDelta {
        self.lag
    }
}

impl<C: Clock> UnitSource for IntervalUnitSource<C> {
    type Unit = DateTime<Utc>;

    fn discovered(&self) -> DiscoveredSet<DateTime<Utc>> {
        self.discovered.clone()
    }

    fn fault(&self) -> SourceFault {
        self.fault.clone()
    }

    fn start(&mut self) -> Result<(), SourceError> {
        if self.handle.is_some() {
            return Ok(());
        }
        // Zero-capacity: nothing is ever sent; dropping the sender is the stop signal.
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let ticker = Ticker {
            // Resume from the newest segment so a restart after stop never re-emits.
            cursor: self
                .discovered
                .snapshot()
                .into_iter()
                .max()
                .unwrap_or(self.start),
            interval: self.interval,
            lag: self.lag,
            tick: self.tick,
            clock: Arc::clone(&self.clock),
            discovered: self.discovered.clone(),
            fault: self.fault.clone(),
        };
        let handle = thread::Builder::new()
            .name(PackagePaths::get().interval_thread_name().to_string())
            .spawn(move || ticker.run(stop_rx))
            .map_err(|e| SourceError::io("spawn interval thread", e))?;
        self.stop_tx = Some(stop_tx);
        self.handle = Some(handle);
        info!(
            "Generating {}s segments from {} (lag {}s)",
            self.interval.num_seconds(),
            self.start,
            self.lag.num_seconds()
        );
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_tx.take();
    }

    fn join(&mut self) -> Result<(), SourceError> {
        match self.handle.take() {
            Some(h) => h.join().map_err(|_| SourceError::Panicked("interval")),
            None => Ok(()),
        }
    }
}

impl<C: Clock> Drop for IntervalUnitSource<C> {
    fn drop(&mut self) {
        self.stop();
        let _ = self.join();
    }
}

/// State owned by the producer thread.
struct Ticker<C: Clock> {
    cursor: DateTime<Utc>,
    interval: TimeDelta,
    lag: TimeDelta,
    tick: Duration,
    clock: Arc<C>,
    discovered: DiscoveredSet<DateTime<Utc>>,
    fault: SourceFault,
}

impl<C: Clock> Ticker<C> {
    fn run(mut self, stop_rx: Receiver<()>) {
        loop {
            self.advance();
            if self.fault.is_set() {
                break;
            }
            match stop_rx.recv_timeout(self.tick) {
                Err(RecvTimeoutError::Timeout) => continue,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("interval loop exited at cursor {}", self.cursor);
    }

    /// Emit every segment that is complete now; a start far in the past catches up in one tick.
    fn advance(&mut self) {
        let now = self.clock.now();
        while let Some(next) = segment_ready(self.cursor, self.interval, self.lag, now) {
            self.discovered.push(next);
            debug!("segment ready: {}", next);
            self.cursor = next;
        }
        let due = self
            .cursor
            .checked_add_signed(self.interval)
            .and_then(|end| end.checked_add_signed(self.lag));
        if due.is_none() {
            let msg = format!("segment clock overflowed after {}", self.cursor);
            error!("{}", msg);
            self.fault.record(msg);
        }
    }
}
