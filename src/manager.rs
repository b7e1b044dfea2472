//! The logfile manager: inventory, lifecycle, recovery, and the public
//! write API.
//!
//! The manager owns every logfile, runs exactly one allocator, synchronizer,
//! and collector thread, and serves any number of writer threads through
//! [`LogfileManager::allocate`] / [`LogfileManager::finalise`].
//!
//! Lifecycle: construction validates the configuration; `start` builds the
//! inventory, recovers from the shutdown marker (or by CRC-walking the
//! logfiles after a crash), and launches the workers; `stop` joins the
//! workers in reverse order, flushes the mappings, and writes the shutdown
//! marker durably.

use crate::allocator::Allocator;
use crate::collector::{self, Collector, LogConsumer};
use crate::config::JournalConfig;
use crate::error::{JournalError, JournalResult};
use crate::inventory::Inventory;
use crate::logfile::{Logfile, LogfileStatus};
use crate::marker::{self, MarkerKind, MARKER_ALIGNMENT, MARKER_HEADER_SIZE};
use crate::shutdown::ShutdownMarker;
use crate::signal::WorkerSignal;
use crate::slots::{SlotReservation, Slots};
use crate::storage::fsync_dir;
use crate::synchronizer::{self, Synchronizer};
use crate::tick::TickGenerator;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

struct Workers {
    synchronizer: JoinHandle<()>,
    allocator: JoinHandle<()>,
    collector: JoinHandle<()>,
}

/// The write-ahead log manager.
pub struct LogfileManager {
    config: JournalConfig,
    inventory: Arc<Inventory>,
    ticks: Arc<TickGenerator>,
    slots: Arc<Slots>,
    consumer: Arc<dyn LogConsumer>,
    allocator_signal: Arc<WorkerSignal>,
    sync_signal: Arc<WorkerSignal>,
    collector_signal: Arc<WorkerSignal>,
    workers: Mutex<Option<Workers>>,
    started: AtomicBool,
    stopped: AtomicBool,
    fatal: Arc<AtomicBool>,
}

impl LogfileManager {
    /// Validate the configuration and prepare a manager. No filesystem
    /// activity happens until [`LogfileManager::start`].
    pub fn new(
        config: JournalConfig,
        consumer: Arc<dyn LogConsumer>,
    ) -> JournalResult<Self> {
        Self::with_tick_generator(config, consumer, Arc::new(TickGenerator::new()))
    }

    /// Like [`LogfileManager::new`] with an injected tick source, so tests
    /// and embedders sharing a process-wide sequence can seed it.
    pub fn with_tick_generator(
        config: JournalConfig,
        consumer: Arc<dyn LogConsumer>,
        ticks: Arc<TickGenerator>,
    ) -> JournalResult<Self> {
        config.validate()?;
        info!(directory = %config.directory.display(), "creating wal logfile manager");

        let inventory = Arc::new(Inventory::new());
        let allocator_signal = Arc::new(WorkerSignal::new());
        let sync_signal = Arc::new(WorkerSignal::new());
        let collector_signal = Arc::new(WorkerSignal::new());
        let slots = Arc::new(Slots::new(
            inventory.clone(),
            ticks.clone(),
            allocator_signal.clone(),
            sync_signal.clone(),
            config.slot_count,
        ));

        Ok(Self {
            config,
            inventory,
            ticks,
            slots,
            consumer,
            allocator_signal,
            sync_signal,
            collector_signal,
            workers: Mutex::new(None),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            fatal: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Build the inventory, run recovery, and launch the worker threads.
    pub fn start(&self) -> JournalResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(JournalError::InvalidState(
                "logfile manager already started".into(),
            ));
        }

        self.ensure_directory()?;
        let ids = self.inventory_scan()?;

        let marker_path = ShutdownMarker::path_in(&self.config.directory);
        let had_marker = marker_path.exists();
        if had_marker {
            let shutdown = ShutdownMarker::read(&marker_path)?;
            info!(
                last_tick = shutdown.last_tick,
                last_collected = shutdown.last_collected,
                "found clean shutdown marker"
            );
            self.slots.set_last_assigned_tick(shutdown.last_tick);
            self.inventory.seed_last_collected(shutdown.last_collected);
        }

        self.open_logfiles(&ids);
        // Everything currently on disk is durable; seed the counters past
        // every observed tick and logfile id.
        self.slots.set_last_assigned_tick(self.ticks.current());

        if had_marker {
            std::fs::remove_file(&marker_path)?;
            fsync_dir(&self.config.directory)?;
        }

        self.spawn_workers()?;
        // Prime the allocator so reserve logfiles exist before the first
        // writer arrives.
        self.allocator_signal.notify();

        info!(
            historic_logfiles = self.config.historic_logfiles,
            reserve_logfiles = self.config.reserve_logfiles,
            logfile_size = self.config.logfile_size,
            "wal logfile manager started"
        );
        Ok(())
    }

    /// Stop the workers, flush the mappings, and write the shutdown marker.
    /// Idempotent; the first failure is the one reported.
    pub fn stop(&self) -> JournalResult<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(JournalError::InvalidState(
                "logfile manager not started".into(),
            ));
        }
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        info!("stopping wal logfile manager");
        self.slots.initiate_shutdown();
        self.halt_workers();

        debug!("closing logfiles");
        for logfile in self.inventory.snapshot() {
            if let Err(e) = logfile.flush_all() {
                warn!(logfile_id = logfile.id(), error = %e, "flush on close failed");
            }
        }

        let shutdown = ShutdownMarker {
            last_tick: self.ticks.current(),
            last_collected: self.inventory.last_collected(),
        };
        shutdown.write(&ShutdownMarker::path_in(&self.config.directory))?;

        info!("wal logfile manager stopped");
        Ok(())
    }

    /// Allocate space for a record of `size` bytes (header included,
    /// 8-byte aligned) and return the reservation.
    pub fn allocate(&self, size: u32) -> JournalResult<SlotReservation> {
        let max = self.max_entry_size();
        if size > max {
            return Err(JournalError::TooLarge { size, max });
        }
        if (size as usize) < MARKER_HEADER_SIZE || size as usize % MARKER_ALIGNMENT != 0 {
            return Err(JournalError::InvalidState(format!(
                "record size {size} must be 8-byte aligned and at least {MARKER_HEADER_SIZE} bytes"
            )));
        }
        self.slots.next_unused(size)
    }

    /// Mark a reservation's record as complete. With `wait_for_sync` the
    /// call blocks until the record is on stable storage.
    pub fn finalise(
        &self,
        reservation: SlotReservation,
        wait_for_sync: bool,
    ) -> JournalResult<()> {
        self.slots.return_used(reservation, wait_for_sync)
    }

    /// Allocate, build the marker in place (tick stamped, CRC computed),
    /// and finalise in one call. Returns the record's tick.
    pub fn allocate_and_write(
        &self,
        kind: MarkerKind,
        payload: &[u8],
        wait_for_sync: bool,
    ) -> JournalResult<u64> {
        if matches!(kind, MarkerKind::Header | MarkerKind::Footer) {
            return Err(JournalError::InvalidState(format!(
                "marker type {kind:?} is reserved for logfile framing"
            )));
        }
        let total = marker::marker_size(payload.len());
        let size = u32::try_from(total).map_err(|_| JournalError::TooLarge {
            size: u32::MAX,
            max: self.max_entry_size(),
        })?;

        let mut reservation = self.allocate(size)?;
        let tick = reservation.tick();
        let mem = reservation.mem()?;
        marker::encode_into(mem, kind, tick, payload);
        self.finalise(reservation, wait_for_sync)?;
        Ok(tick)
    }

    /// Largest record (header included) accepted by `allocate`.
    pub fn max_entry_size(&self) -> u32 {
        self.config.max_entry_size()
    }

    /// Directory holding the logfiles.
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// True iff enough writeable logfiles are on hand.
    pub fn has_reserve_logfiles(&self) -> bool {
        self.inventory.count_writeable() >= self.config.reserve_logfiles
    }

    /// Wake the synchronizer for an extra pass.
    pub fn signal_sync(&self) {
        self.sync_signal.notify();
    }

    /// Seal every logfile whose seal-requested transition has drained.
    pub fn seal_logfiles(&self) {
        synchronizer::seal_eligible(&self.inventory);
    }

    /// Ask for a logfile to be sealed once its slots drain.
    pub fn request_sealing(&self, logfile: &Arc<Logfile>) {
        logfile.request_sealing();
        self.signal_sync();
    }

    /// Mark a logfile as being replayed downstream.
    pub fn set_collection_requested(&self, logfile: &Arc<Logfile>) {
        logfile.set_status(LogfileStatus::CollectionRequested);
    }

    /// Mark a logfile as durably absorbed downstream.
    pub fn set_collection_done(&self, logfile: &Arc<Logfile>) {
        logfile.set_status(LogfileStatus::Collected);
        self.inventory.set_last_collected(logfile.id());
    }

    /// First logfile that can take a record of `size` bytes, waiting for
    /// the allocator (bounded) when none exists.
    pub fn get_writeable_logfile(&self, size: u32) -> Option<Arc<Logfile>> {
        for _ in 0..1000 {
            if let Some(logfile) = self.inventory.find_first(|lf| lf.is_writeable(size)) {
                return Some(logfile);
            }
            self.allocator_signal.notify();
            self.inventory.wait_changed(Duration::from_millis(10));
        }
        None
    }

    /// Oldest logfile ready for collection, if any.
    pub fn get_collectable_logfile(&self) -> Option<Arc<Logfile>> {
        self.inventory.find_first(|lf| lf.can_be_collected())
    }

    /// Oldest collected logfile beyond the historic retention count, if
    /// any.
    pub fn get_removable_logfile(&self) -> Option<Arc<Logfile>> {
        collector::find_removable(&self.inventory, self.config.historic_logfiles)
    }

    /// All logfiles in ascending id order.
    pub fn logfiles(&self) -> Vec<Arc<Logfile>> {
        self.inventory.snapshot()
    }

    /// Highest tick handed to a record.
    pub fn last_assigned_tick(&self) -> u64 {
        self.slots.last_assigned_tick()
    }

    /// Highest tick T such that every record with tick <= T is on stable
    /// storage.
    pub fn durable_tick(&self) -> u64 {
        self.slots.durable_tick()
    }

    /// Id of the last fully collected logfile (0 if none).
    pub fn last_collected(&self) -> u64 {
        self.inventory.last_collected()
    }

    /// Whether a background worker hit an unrecoverable failure.
    pub fn has_failed(&self) -> bool {
        self.fatal.load(Ordering::Acquire)
    }

    fn ensure_directory(&self) -> JournalResult<()> {
        let dir = &self.config.directory;
        if !dir.is_dir() {
            info!(directory = %dir.display(), "wal directory does not exist, creating it");
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Enumerate `logfile-<id>.db` entries, raise the tick floor past every
    /// observed id, and return the ids ascending.
    fn inventory_scan(&self) -> JournalResult<Vec<u64>> {
        trace!(directory = %self.config.directory.display(), "scanning wal directory");
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.config.directory)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(id) = parse_logfile_id(name) else {
                continue;
            };
            if id == 0 {
                warn!(file = name, "encountered invalid id for logfile, ids must be > 0");
                continue;
            }
            self.ticks.update(id);
            ids.push(id);
        }
        ids.sort_unstable();
        Ok(ids)
    }

    /// Open every inventoried logfile, rebuilding its append cursor.
    /// Logfiles that fail to open are dropped from the inventory but left
    /// on disk for the operator.
    fn open_logfiles(&self, ids: &[u64]) {
        for &id in ids {
            let path = self.logfile_path(id);
            match Logfile::open(&path, id) {
                Ok((logfile, highest_tick)) => {
                    self.ticks.update(highest_tick);
                    self.inventory.insert(Arc::new(logfile));
                }
                Err(e) => {
                    warn!(
                        logfile_id = id,
                        error = %e,
                        "could not open logfile, dropping it from the inventory"
                    );
                }
            }
        }
    }

    fn logfile_path(&self, id: u64) -> std::path::PathBuf {
        self.config.directory.join(format!("logfile-{id}.db"))
    }

    fn spawn_workers(&self) -> JournalResult<()> {
        let synchronizer = Synchronizer {
            slots: self.slots.clone(),
            inventory: self.inventory.clone(),
            signal: self.sync_signal.clone(),
            interval: self.config.sync_interval,
        }
        .spawn()?;

        let allocator = Allocator {
            inventory: self.inventory.clone(),
            ticks: self.ticks.clone(),
            slots: self.slots.clone(),
            signal: self.allocator_signal.clone(),
            directory: self.config.directory.clone(),
            logfile_size: self.config.logfile_size,
            reserve_logfiles: self.config.reserve_logfiles,
            interval: self.config.allocator_interval,
            fatal: self.fatal.clone(),
        }
        .spawn();
        let allocator = match allocator {
            Ok(handle) => handle,
            Err(e) => {
                self.sync_signal.stop();
                let _ = synchronizer.join();
                return Err(e.into());
            }
        };

        let collector = Collector {
            inventory: self.inventory.clone(),
            consumer: self.consumer.clone(),
            slots: self.slots.clone(),
            signal: self.collector_signal.clone(),
            interval: self.config.collector_interval,
            historic_logfiles: self.config.historic_logfiles,
            fatal: self.fatal.clone(),
        }
        .spawn();
        let collector = match collector {
            Ok(handle) => handle,
            Err(e) => {
                self.allocator_signal.stop();
                let _ = allocator.join();
                self.sync_signal.stop();
                let _ = synchronizer.join();
                return Err(e.into());
            }
        };

        *self.workers.lock() = Some(Workers {
            synchronizer,
            allocator,
            collector,
        });
        Ok(())
    }

    /// Join the workers in reverse startup order: collector, allocator,
    /// synchronizer. The synchronizer exits last so it can drain the
    /// in-flight prefix.
    fn halt_workers(&self) {
        let Some(workers) = self.workers.lock().take() else {
            return;
        };
        trace!("stopping wal collector thread");
        self.collector_signal.stop();
        let _ = workers.collector.join();

        trace!("stopping wal allocator thread");
        self.allocator_signal.stop();
        let _ = workers.allocator.join();

        trace!("stopping wal synchronizer thread");
        self.sync_signal.stop();
        let _ = workers.synchronizer.join();
    }
}

impl Drop for LogfileManager {
    fn drop(&mut self) {
        if self.started.load(Ordering::Acquire) && !self.stopped.load(Ordering::Acquire) {
            // Dropped without `stop`: tear the workers down but leave no
            // shutdown marker, so the next start runs recovery.
            warn!("wal logfile manager dropped without stop");
            self.slots.initiate_shutdown();
            self.halt_workers();
        }
    }
}

/// Parse a `logfile-<digits>.db` file name into its id.
pub(crate) fn parse_logfile_id(name: &str) -> Option<u64> {
    let digits = name.strip_prefix("logfile-")?.strip_suffix(".db")?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse::<u64>().ok()
}
