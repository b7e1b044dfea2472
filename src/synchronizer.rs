//! The synchronizer: flushes the durable prefix and drives sealing.
//!
//! On signal or timeout the synchronizer computes the contiguous prefix of
//! used slots past the durable tick, fsyncs the affected byte ranges, and
//! publishes the new durable tick, waking writers blocked in
//! `finalise(_, wait_for_sync: true)`. It then seals logfiles whose
//! seal-requested transition has fully drained.

use crate::inventory::Inventory;
use crate::signal::WorkerSignal;
use crate::slots::Slots;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct Synchronizer {
    pub(crate) slots: Arc<Slots>,
    pub(crate) inventory: Arc<Inventory>,
    pub(crate) signal: Arc<WorkerSignal>,
    pub(crate) interval: Duration,
}

impl Synchronizer {
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("wal-synchronizer".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("synchronizer thread started");
        loop {
            let stopped = self.signal.wait(self.interval);
            self.sync_pass();
            self.seal_pass();
            if stopped {
                break;
            }
        }
        // Complete the in-flight prefix before exiting so a clean stop
        // leaves nothing unsynced behind returned slots.
        self.sync_pass();
        self.seal_pass();
        debug!("synchronizer thread stopped");
    }

    /// Fsync ready regions and retire their slots, advancing the durable
    /// tick. A failed fsync leaves the region in place for the next cycle.
    fn sync_pass(&self) {
        while let Some(region) = self.slots.sync_region() {
            match region.logfile.sync_range(region.offset, region.len) {
                Ok(()) => {
                    trace!(
                        logfile_id = region.logfile.id(),
                        offset = region.offset,
                        len = region.len,
                        last_tick = region.last_tick,
                        "synced region"
                    );
                    self.slots.return_sync_region(region);
                }
                Err(e) => {
                    error!(
                        logfile_id = region.logfile.id(),
                        error = %e,
                        "could not sync logfile region"
                    );
                    break;
                }
            }
        }
    }

    fn seal_pass(&self) {
        seal_eligible(&self.inventory);
    }
}

/// Seal every logfile whose seal-requested transition has drained.
///
/// Each candidate is unlinked from the inventory for the duration of the
/// seal so concurrent scans cannot pick it, then re-linked regardless of
/// the outcome; a failed seal keeps its status and is retried next cycle.
pub(crate) fn seal_eligible(inventory: &Inventory) {
    let candidates: Vec<_> = inventory
        .snapshot()
        .into_iter()
        .filter(|lf| lf.can_be_sealed())
        .collect();

    for logfile in candidates {
        let Some(logfile) = inventory.remove(logfile.id()) else {
            continue;
        };
        match logfile.seal() {
            Ok(()) => info!(logfile_id = logfile.id(), "sealed logfile"),
            Err(e) => warn!(
                logfile_id = logfile.id(),
                error = %e,
                "sealing failed, will retry"
            ),
        }
        inventory.insert(logfile);
    }
}
