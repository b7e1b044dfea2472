//! The allocator: pre-creates reserve logfiles.
//!
//! On signal (a writer found no writeable logfile) or timeout, the
//! allocator counts writeable logfiles and creates zero-filled reserves
//! until the configured count is met. Creation failures (disk full,
//! permissions) are fatal: a write-ahead log that cannot grow cannot
//! accept writes.

use crate::error::JournalResult;
use crate::inventory::Inventory;
use crate::logfile::Logfile;
use crate::signal::WorkerSignal;
use crate::slots::Slots;
use crate::tick::TickGenerator;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info};

pub(crate) struct Allocator {
    pub(crate) inventory: Arc<Inventory>,
    pub(crate) ticks: Arc<TickGenerator>,
    pub(crate) slots: Arc<Slots>,
    pub(crate) signal: Arc<WorkerSignal>,
    pub(crate) directory: PathBuf,
    pub(crate) logfile_size: u32,
    pub(crate) reserve_logfiles: usize,
    pub(crate) interval: Duration,
    pub(crate) fatal: Arc<AtomicBool>,
}

impl Allocator {
    pub(crate) fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("wal-allocator".into())
            .spawn(move || self.run())
    }

    fn run(self) {
        debug!("allocator thread started");
        loop {
            let stopped = self.signal.wait(self.interval);
            if stopped {
                break;
            }
            if let Err(e) = self.ensure_reserves() {
                error!(error = %e, "cannot create reserve logfile");
                self.fatal.store(true, Ordering::Release);
                self.slots.initiate_shutdown();
                break;
            }
        }
        debug!("allocator thread stopped");
    }

    fn ensure_reserves(&self) -> JournalResult<()> {
        while self.inventory.count_writeable() < self.reserve_logfiles {
            if self.signal.stopped() {
                break;
            }
            let id = self.ticks.next();
            let path = self.directory.join(format!("logfile-{id}.db"));
            info!(path = %path.display(), "creating empty logfile");
            let logfile = Logfile::create(&path, id, self.logfile_size)?;
            self.inventory.insert(Arc::new(logfile));
        }
        Ok(())
    }
}
