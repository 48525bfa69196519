//! Unit discovery: background producers that append newly available units to a shared,
//! append-only [`DiscoveredSet`].

pub mod directory;
pub mod error;
pub mod interval;

pub use directory::DirectoryUnitSource;
pub use error::SourceError;
pub use interval::{Clock, IntervalUnitSource, ManualClock, SystemClock, segment_ready};

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Bound shared by every unit type: totally ordered, cheap enough to clone into batches.
pub trait Unit: Ord + Clone + Debug + Send + Sync + 'static {}

impl<T> Unit for T where T: Ord + Clone + Debug + Send + Sync + 'static {}

/// A producer of units of work. Owns a background thread between `start` and `join`.
pub trait UnitSource {
    type Unit: Unit;

    /// Shared handle to the units discovered so far (seeded units included).
    fn discovered(&self) -> DiscoveredSet<Self::Unit>;

    /// Handle to the producer's fault slot.
    fn fault(&self) -> SourceFault;

    /// Begin discovery in the background. Calling twice is a no-op.
    fn start(&mut self) -> Result<(), SourceError>;

    /// Ask the producer to stop. Returns without waiting; see [`join`](Self::join).
    fn stop(&mut self);

    /// Block until the producer thread has exited.
    fn join(&mut self) -> Result<(), SourceError>;
}

#[derive(Debug)]
struct Discovered<U> {
    order: Vec<U>,
    seen: BTreeSet<U>,
}

/// Append-only sequence of discovered units, shared between one producer and one consumer.
///
/// Units are kept in discovery order and never removed. A unit already present is not appended
/// again, so `len()` minus the consumer's finished count is exactly the number of pending units.
#[derive(Debug)]
pub struct DiscoveredSet<U> {
    inner: Arc<Mutex<Discovered<U>>>,
}

impl<U> Clone for DiscoveredSet<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: Unit> Default for DiscoveredSet<U> {
    fn default() -> Self {
        Self::new()
    }
}

impl<U: Unit> DiscoveredSet<U> {
    pub fn new() -> Self {
        Self::from_units(Vec::new())
    }

    /// Seed with `units` in the given order (duplicates dropped).
    pub fn from_units(units: Vec<U>) -> Self {
        let set = Self {
            inner: Arc::new(Mutex::new(Discovered {
                order: Vec::with_capacity(units.len()),
                seen: BTreeSet::new(),
            })),
        };
        for u in units {
            set.push(u);
        }
        set
    }

    fn lock(&self) -> MutexGuard<'_, Discovered<U>> {
        // Every mutation is a single push; a panicking holder cannot leave it half-applied.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `unit`. Returns false when it was already discovered.
    pub fn push(&self, unit: U) -> bool {
        let mut guard = self.lock();
        if !guard.seen.insert(unit.clone()) {
            return false;
        }
        guard.order.push(unit);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, unit: &U) -> bool {
        self.lock().seen.contains(unit)
    }

    /// Copy of the units in discovery order.
    pub fn snapshot(&self) -> Vec<U> {
        self.lock().order.clone()
    }
}

/// First error hit by a producer thread. Once set, the producer has exited and no further units
/// will be discovered.
#[derive(Clone, Debug, Default)]
pub struct SourceFault {
    first_error: Arc<Mutex<Option<String>>>,
}

impl SourceFault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `msg` unless an earlier error is already stored.
    pub fn record(&self, msg: impl Into<String>) {
        let mut guard = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        guard.get_or_insert_with(|| msg.into());
    }

    pub fn get(&self) -> Option<String> {
        self.first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_ignores_duplicates() {
        let set = DiscoveredSet::new();
        assert!(set.push("b"));
        assert!(set.push("a"));
        assert!(!set.push("b"));
        assert_eq!(set.snapshot(), vec!["b", "a"]);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn clones_share_storage() {
        let set = DiscoveredSet::from_units(vec![1, 2]);
        let reader = set.clone();
        set.push(3);
        assert_eq!(reader.len(), 3);
        assert!(reader.contains(&3));
    }

    #[test]
    fn length_never_decreases_under_concurrent_appends() {
        let set = DiscoveredSet::new();
        let writer = set.clone();
        let producer = std::thread::spawn(move || {
            for i in 0..2_000 {
                writer.push(i % 1_500);
            }
        });
        let mut last = 0;
        while !producer.is_finished() {
            let now = set.len();
            assert!(now >= last);
            last = now;
        }
        producer.join().unwrap();
        assert_eq!(set.len(), 1_500);
    }

    #[test]
    fn fault_keeps_first_error() {
        let fault = SourceFault::new();
        assert!(!fault.is_set());
        fault.record("inotify queue overflow");
        fault.record("second");
        assert_eq!(fault.get().as_deref(), Some("inotify queue overflow"));
    }
}
