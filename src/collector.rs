//! The collector: replays sealed logfiles into the downstream store.
//!
//! On timer the collector picks the oldest collectable logfile, hands its
//! payload records to the consumer in offset order, and marks it collected
//! on success. Collected logfiles beyond the configured historic count are
//! then removed from the inventory and unlinked from disk.

use crate::inventory::Inventory;
use crate::logfile::{Logfile, LogfileStatus};
use crate::marker::MarkerKind;
use crate::signal::WorkerSignal;
use crate::slots::Slots;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Verdict of a consumer on one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerOutcome {
    /// The record was absorbed; continue.
    Ok,
    /// The consumer cannot take the logfile now; retry the whole logfile
    /// on a later cycle.
    Retry,
    /// The consumer is broken; initiate shutdown.
    Fatal,
}

/// Downstream sink for collected records.
///
/// The collector delivers every payload marker of a sealed logfile, in
/// offset (= tick) order. Header and footer markers are structural and not
/// delivered. `payload` includes the record's alignment padding.
pub trait LogConsumer: Send + Sync {
    /// Absorb one record.
    fn consume(&self, logfile_id: u64, kind: MarkerKind, tick: u64, payload: &[u8])
        -> ConsumerOutcome;
}

enum CollectResult {
    Collected,
    RetryLater,
    Fatal,
}

pub(crate) struct Collector {
    pub(crate) inventory: Arc<Inventory>,
    pub(crate) consumer: Arc<dyn LogConsumer>,
    pub(crate) slots: Arc<Slots>,
    pub(crate) signal: Arc<WorkerSignal>,
    pub(crate) interval: Duration,
    pub(crate) historic_logfiles: usize,
    pub(crate) fatal: Arc<AtomicBool>,
}

impl Collector {
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("wal-collector".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("collector thread started");
        loop {
            let stopped = self.signal.wait(self.interval);
            if stopped {
                break;
            }
            if !self.collect_pass() {
                self.fatal.store(true, Ordering::Release);
                self.slots.initiate_shutdown();
                break;
            }
        }
        debug!("collector thread stopped");
    }

    /// Collect logfiles until none are ready. Returns `false` on a fatal
    /// consumer verdict.
    fn collect_pass(&self) -> bool {
        while let Some(logfile) = self.inventory.find_first(|lf| lf.can_be_collected()) {
            if self.signal.stopped() {
                // Defer the logfile; it is picked up again on restart or
                // the next cycle.
                break;
            }
            logfile.set_status(LogfileStatus::CollectionRequested);
            match self.collect_one(&logfile) {
                CollectResult::Collected => {
                    logfile.set_status(LogfileStatus::Collected);
                    self.inventory.set_last_collected(logfile.id());
                    info!(logfile_id = logfile.id(), "collected logfile");
                    self.remove_pass();
                }
                CollectResult::RetryLater => {
                    trace!(
                        logfile_id = logfile.id(),
                        "consumer deferred collection, retrying later"
                    );
                    break;
                }
                CollectResult::Fatal => {
                    error!(
                        logfile_id = logfile.id(),
                        "consumer reported a fatal failure"
                    );
                    return false;
                }
            }
        }
        true
    }

    fn collect_one(&self, logfile: &Arc<Logfile>) -> CollectResult {
        let records = match logfile.records() {
            Ok(iter) => iter,
            Err(e) => {
                warn!(logfile_id = logfile.id(), error = %e, "cannot read logfile");
                return CollectResult::RetryLater;
            }
        };
        for record in records {
            let marker = record.marker;
            if matches!(marker.kind, MarkerKind::Header | MarkerKind::Footer) {
                continue;
            }
            match self
                .consumer
                .consume(logfile.id(), marker.kind, marker.tick, marker.payload)
            {
                ConsumerOutcome::Ok => {}
                ConsumerOutcome::Retry => return CollectResult::RetryLater,
                ConsumerOutcome::Fatal => return CollectResult::Fatal,
            }
        }
        CollectResult::Collected
    }

    /// Drop collected logfiles beyond the historic retention count.
    fn remove_pass(&self) {
        while let Some(logfile) =
            find_removable(&self.inventory, self.historic_logfiles)
        {
            remove_logfile(&self.inventory, &logfile);
        }
    }
}

/// Oldest collected logfile exceeding the historic retention count, if any.
///
/// A logfile is eligible iff it is collected and its id is covered by
/// `last_collected`; the most recent `historic` eligible logfiles are
/// retained.
pub(crate) fn find_removable(inventory: &Inventory, historic: usize) -> Option<Arc<Logfile>> {
    let last_collected = inventory.last_collected();
    let mut first = None;
    let mut count = 0usize;
    for logfile in inventory.snapshot() {
        if logfile.can_be_removed() && logfile.id() <= last_collected {
            if first.is_none() {
                first = Some(logfile);
            }
            count += 1;
            if count > historic {
                return first;
            }
        }
    }
    None
}

/// Remove a logfile from the inventory, then from disk. An unlink failure
/// is logged and swallowed; the file is cleaned up on a later startup.
pub(crate) fn remove_logfile(inventory: &Inventory, logfile: &Arc<Logfile>) {
    inventory.remove(logfile.id());
    info!(
        logfile_id = logfile.id(),
        path = %logfile.path().display(),
        "removing logfile"
    );
    if let Err(e) = std::fs::remove_file(logfile.path()) {
        warn!(
            logfile_id = logfile.id(),
            error = %e,
            "unable to remove logfile from disk"
        );
    }
}
