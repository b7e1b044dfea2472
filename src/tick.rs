//! Process-wide tick generation.
//!
//! A tick is a monotonically increasing 64-bit sequence number. Ticks name
//! records and logfiles alike: every record carries the tick of its slot,
//! and a logfile's id is the tick the generator handed out when the file
//! was created. Injected as a capability so tests can seed and assert ticks
//! deterministically.

use std::sync::atomic::{AtomicU64, Ordering};

/// Strictly increasing tick source shared by the slots ring and the
/// allocator.
#[derive(Debug, Default)]
pub struct TickGenerator {
    counter: AtomicU64,
}

impl TickGenerator {
    /// Create a generator starting at zero; the first `next()` returns 1.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator whose next tick follows `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            counter: AtomicU64::new(seed),
        }
    }

    /// Hand out the next tick. Strictly increasing across all callers.
    pub fn next(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Raise the floor so no future tick is `<= observed`. Used while
    /// scanning existing logfiles during startup.
    pub fn update(&self, observed: u64) {
        self.counter.fetch_max(observed, Ordering::AcqRel);
    }

    /// Highest tick handed out (or seeded) so far.
    pub fn current(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }
}
