//! The manager's logfile inventory.
//!
//! The mapping `id → Logfile` is ordered ascending by id so scans observe
//! chronological order. Readers (reserve counting, writeable search,
//! collector selection) share; mutators (insert on create, erase on remove)
//! take the writer lock.

use crate::logfile::{Logfile, LogfileStatus};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Inventory {
    logfiles: RwLock<BTreeMap<u64, Arc<Logfile>>>,
    /// Id of the last fully collected logfile; persisted in the shutdown
    /// marker.
    last_collected: AtomicU64,
    changed_lock: Mutex<()>,
    changed: Condvar,
}

impl Inventory {
    pub(crate) fn new() -> Self {
        Self {
            logfiles: RwLock::new(BTreeMap::new()),
            last_collected: AtomicU64::new(0),
            changed_lock: Mutex::new(()),
            changed: Condvar::new(),
        }
    }

    /// Insert (or re-link) a logfile and wake writers waiting for space.
    pub(crate) fn insert(&self, logfile: Arc<Logfile>) {
        self.logfiles.write().insert(logfile.id(), logfile);
        self.notify_changed();
    }

    /// Remove a logfile from the mapping only; the file stays on disk.
    pub(crate) fn remove(&self, id: u64) -> Option<Arc<Logfile>> {
        self.logfiles.write().remove(&id)
    }

    /// All logfiles in ascending id order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Logfile>> {
        self.logfiles.read().values().cloned().collect()
    }

    /// Count of logfiles still accepting reservations.
    pub(crate) fn count_writeable(&self) -> usize {
        self.logfiles
            .read()
            .values()
            .filter(|lf| {
                matches!(lf.status(), LogfileStatus::Empty | LogfileStatus::Open)
                    && lf.free_size() > 0
            })
            .count()
    }

    /// First logfile (ascending) matching `pred`.
    pub(crate) fn find_first(
        &self,
        pred: impl Fn(&Arc<Logfile>) -> bool,
    ) -> Option<Arc<Logfile>> {
        self.logfiles.read().values().find(|lf| pred(lf)).cloned()
    }

    pub(crate) fn last_collected(&self) -> u64 {
        self.last_collected.load(Ordering::Acquire)
    }

    pub(crate) fn set_last_collected(&self, id: u64) {
        self.last_collected.fetch_max(id, Ordering::AcqRel);
    }

    /// Seed `last_collected` from the shutdown marker during recovery.
    pub(crate) fn seed_last_collected(&self, id: u64) {
        self.last_collected.store(id, Ordering::Release);
    }

    /// Block until the mapping changes or `timeout` elapses.
    pub(crate) fn wait_changed(&self, timeout: Duration) {
        let mut guard = self.changed_lock.lock();
        let _ = self.changed.wait_for(&mut guard, timeout);
    }

    pub(crate) fn notify_changed(&self) {
        let _guard = self.changed_lock.lock();
        self.changed.notify_all();
    }
}
