//! Shared consumers and fixtures for the integration tests.
//!
//! Important: this file lives under `tests/support/` so it is **not**
//! compiled as a standalone integration test target.
#![allow(dead_code)]

use journal::{ConsumerOutcome, JournalConfig, LogConsumer, MarkerKind};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Consumer that accepts everything and remembers what it saw.
#[derive(Default)]
pub struct RecordingConsumer {
    records: Mutex<Vec<(u64, u64, Vec<u8>)>>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(logfile_id, tick, payload)` triples in delivery order.
    pub fn records(&self) -> Vec<(u64, u64, Vec<u8>)> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

impl LogConsumer for RecordingConsumer {
    fn consume(
        &self,
        logfile_id: u64,
        _kind: MarkerKind,
        tick: u64,
        payload: &[u8],
    ) -> ConsumerOutcome {
        self.records
            .lock()
            .unwrap()
            .push((logfile_id, tick, payload.to_vec()));
        ConsumerOutcome::Ok
    }
}

/// Consumer that defers the first `retries` deliveries before accepting.
pub struct ReluctantConsumer {
    remaining: AtomicUsize,
    accepted: AtomicUsize,
}

impl ReluctantConsumer {
    pub fn new(retries: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(retries),
            accepted: AtomicUsize::new(0),
        }
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::Acquire)
    }
}

impl LogConsumer for ReluctantConsumer {
    fn consume(
        &self,
        _logfile_id: u64,
        _kind: MarkerKind,
        _tick: u64,
        _payload: &[u8],
    ) -> ConsumerOutcome {
        if self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
        {
            return ConsumerOutcome::Retry;
        }
        self.accepted.fetch_add(1, Ordering::AcqRel);
        ConsumerOutcome::Ok
    }
}

/// Small-file configuration so tests exercise rotation and sealing fast.
pub fn small_config(dir: &Path) -> JournalConfig {
    JournalConfig::new(dir)
        .logfile_size(64 * 1024)
        .reserve_logfiles(2)
        .historic_logfiles(2)
        .slot_count(4096)
        .sync_interval(std::time::Duration::from_millis(10))
        .allocator_interval(std::time::Duration::from_millis(50))
        .collector_interval(std::time::Duration::from_millis(25))
}
