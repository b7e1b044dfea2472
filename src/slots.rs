//! The slots ring: multi-writer slot reservation with ordered release.
//!
//! Every record occupies one slot in a fixed-capacity ring. Reservation
//! happens in a single critical section that assigns the tick, picks a
//! writeable logfile, and advances that logfile's append cursor, so tick
//! order equals reservation order and, within a logfile, offset order.
//!
//! Release is two-phase: the writer marks its slot used once the payload
//! and CRC are in place, and the synchronizer later retires the contiguous
//! used prefix after pushing it to stable storage, publishing the durable
//! tick. When the ring is full, reservation blocks until slots are retired.

use crate::error::{JournalError, JournalResult};
use crate::inventory::Inventory;
use crate::logfile::{Logfile, Reserve};
use crate::signal::WorkerSignal;
use crate::tick::TickGenerator;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Retry tick while looking for a writeable logfile.
const RETRY_WAIT: Duration = Duration::from_millis(10);

/// Bound on writeable-logfile retries before reporting `OutOfSpace`.
const MAX_RETRIES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Free,
    Reserved,
    Used,
}

struct Slot {
    tick: u64,
    offset: u32,
    len: u32,
    state: SlotState,
    logfile: Option<Arc<Logfile>>,
}

impl Slot {
    fn empty() -> Self {
        Self {
            tick: 0,
            offset: 0,
            len: 0,
            state: SlotState::Free,
            logfile: None,
        }
    }
}

struct SlotsState {
    ring: Vec<Slot>,
    /// Next slot to hand out.
    handout: usize,
    /// Oldest slot not yet retired by the synchronizer.
    recycle: usize,
    free: usize,
    last_assigned: u64,
}

/// A reserved write region, valid until passed back through `finalise`.
///
/// The writer copies its record into [`SlotReservation::mem`], stamps the
/// CRC, and returns the reservation. Dropping an unfinalised reservation
/// stalls the durable prefix behind it; debug builds assert against it.
#[must_use = "pass the reservation to finalise() once the record is written"]
pub struct SlotReservation {
    index: usize,
    tick: u64,
    logfile: Arc<Logfile>,
    offset: u32,
    len: u32,
    finalised: bool,
}

impl SlotReservation {
    /// Tick assigned to this record.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Id of the logfile holding the reserved region.
    pub fn logfile_id(&self) -> u64 {
        self.logfile.id()
    }

    /// Length of the reserved region in bytes.
    pub fn len(&self) -> u32 {
        self.len
    }

    /// Whether the reservation covers zero bytes (never, in practice).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Mutable view of the reserved region.
    ///
    /// Regions of distinct reservations are disjoint, which is what makes
    /// the underlying shared mapping access sound.
    pub fn mem(&mut self) -> JournalResult<&mut [u8]> {
        self.logfile.slot_mem(self.offset, self.len)
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        debug_assert!(
            self.finalised,
            "slot reservation dropped without being finalised"
        );
    }
}

/// A contiguous run of used slots within one logfile, ready to fsync.
pub(crate) struct SyncRegion {
    pub(crate) logfile: Arc<Logfile>,
    pub(crate) offset: u32,
    pub(crate) len: u32,
    pub(crate) last_tick: u64,
    pub(crate) slot_count: usize,
}

pub(crate) struct Slots {
    inventory: Arc<Inventory>,
    ticks: Arc<TickGenerator>,
    allocator_signal: Arc<WorkerSignal>,
    sync_signal: Arc<WorkerSignal>,
    state: Mutex<SlotsState>,
    /// Signaled when the synchronizer retires slots (ring space available).
    recycled: Condvar,
    /// Signaled when the durable tick advances.
    synced: Condvar,
    /// Highest tick T such that every record with tick <= T is on stable
    /// storage. Monotonically non-decreasing.
    last_committed: AtomicU64,
    shutdown: AtomicBool,
}

impl Slots {
    pub(crate) fn new(
        inventory: Arc<Inventory>,
        ticks: Arc<TickGenerator>,
        allocator_signal: Arc<WorkerSignal>,
        sync_signal: Arc<WorkerSignal>,
        capacity: usize,
    ) -> Self {
        let mut ring = Vec::with_capacity(capacity);
        ring.resize_with(capacity, Slot::empty);
        Self {
            inventory,
            ticks,
            allocator_signal,
            sync_signal,
            state: Mutex::new(SlotsState {
                ring,
                handout: 0,
                recycle: 0,
                free: capacity,
                last_assigned: 0,
            }),
            recycled: Condvar::new(),
            synced: Condvar::new(),
            last_committed: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Reserve the next slot: assign a tick, find or switch to a writeable
    /// logfile, and bind the slot to a region there.
    ///
    /// Blocks while the ring is full. When no writeable logfile exists the
    /// allocator is signaled and the attempt retried on a 10 ms tick, up to
    /// a bound, after which `OutOfSpace` is returned.
    pub(crate) fn next_unused(&self, size: u32) -> JournalResult<SlotReservation> {
        let mut retries = 0usize;
        loop {
            if self.shutdown.load(Ordering::Acquire) {
                return Err(JournalError::ShuttingDown);
            }

            {
                let mut st = self.state.lock();
                if st.free == 0 {
                    // Ring full: block until the synchronizer retires slots.
                    let _ = self.recycled.wait_for(&mut st, RETRY_WAIT);
                    continue;
                }

                if let Some((logfile, offset)) = self.reserve_region(size) {
                    let tick = self.ticks.next();
                    st.last_assigned = tick;
                    logfile.note_reservation(tick);

                    let index = st.handout;
                    let capacity = st.ring.len();
                    let slot = &mut st.ring[index];
                    debug_assert_eq!(slot.state, SlotState::Free);
                    slot.tick = tick;
                    slot.offset = offset;
                    slot.len = size;
                    slot.state = SlotState::Reserved;
                    slot.logfile = Some(logfile.clone());
                    st.handout = (st.handout + 1) % capacity;
                    st.free -= 1;

                    return Ok(SlotReservation {
                        index,
                        tick,
                        logfile,
                        offset,
                        len: size,
                        finalised: false,
                    });
                }
            }

            // No logfile with room: ask the allocator for a new one and
            // wait for the inventory to change.
            self.allocator_signal.notify();
            self.inventory.wait_changed(RETRY_WAIT);
            retries += 1;
            if retries >= MAX_RETRIES {
                return Err(JournalError::OutOfSpace);
            }
        }
    }

    /// Scan logfiles ascending and reserve `size` bytes in the first one
    /// that fits. A partial fit flips that logfile to seal-requested and
    /// nudges the synchronizer.
    fn reserve_region(&self, size: u32) -> Option<(Arc<Logfile>, u32)> {
        for logfile in self.inventory.snapshot() {
            match logfile.reserve(size) {
                Reserve::Granted(offset) => return Some((logfile, offset)),
                Reserve::Full => self.sync_signal.notify(),
                Reserve::NotWriteable => {}
            }
        }
        None
    }

    /// Mark a slot as used. With `wait_for_sync`, block until the durable
    /// tick covers it.
    pub(crate) fn return_used(
        &self,
        mut reservation: SlotReservation,
        wait_for_sync: bool,
    ) -> JournalResult<()> {
        reservation.finalised = true;
        let tick = reservation.tick;
        {
            let mut st = self.state.lock();
            let slot = &mut st.ring[reservation.index];
            debug_assert_eq!(slot.state, SlotState::Reserved);
            debug_assert_eq!(slot.tick, tick);
            slot.state = SlotState::Used;
        }
        self.sync_signal.notify();

        if !wait_for_sync {
            return Ok(());
        }

        let mut st = self.state.lock();
        loop {
            if self.last_committed.load(Ordering::Acquire) >= tick {
                return Ok(());
            }
            if self.shutdown.load(Ordering::Acquire) {
                return Err(JournalError::ShuttingDown);
            }
            self.synced.wait(&mut st);
        }
    }

    /// The contiguous used prefix starting at the oldest unretired slot,
    /// restricted to a single logfile. `None` when nothing is ready.
    pub(crate) fn sync_region(&self) -> Option<SyncRegion> {
        let st = self.state.lock();
        let capacity = st.ring.len();
        let pending = capacity - st.free;
        let mut region: Option<SyncRegion> = None;

        for i in 0..pending {
            let slot = &st.ring[(st.recycle + i) % capacity];
            if slot.state != SlotState::Used {
                break;
            }
            let logfile = slot.logfile.as_ref().expect("used slot has a logfile");
            match &mut region {
                None => {
                    region = Some(SyncRegion {
                        logfile: logfile.clone(),
                        offset: slot.offset,
                        len: slot.len,
                        last_tick: slot.tick,
                        slot_count: 1,
                    });
                }
                Some(r) => {
                    if !Arc::ptr_eq(&r.logfile, logfile) {
                        break;
                    }
                    // Reservation order makes same-logfile runs contiguous.
                    debug_assert_eq!(r.offset + r.len, slot.offset);
                    r.len += slot.len;
                    r.last_tick = slot.tick;
                    r.slot_count += 1;
                }
            }
        }
        region
    }

    /// Retire the slots of a synced region, publish the durable tick, and
    /// wake blocked writers.
    pub(crate) fn return_sync_region(&self, region: SyncRegion) {
        let mut st = self.state.lock();
        let capacity = st.ring.len();
        for _ in 0..region.slot_count {
            let index = st.recycle;
            let slot = &mut st.ring[index];
            debug_assert_eq!(slot.state, SlotState::Used);
            slot.state = SlotState::Free;
            if let Some(logfile) = slot.logfile.take() {
                logfile.note_recycled();
            }
            st.recycle = (st.recycle + 1) % capacity;
            st.free += 1;
        }
        self.last_committed
            .fetch_max(region.last_tick, Ordering::AcqRel);
        self.synced.notify_all();
        self.recycled.notify_all();
    }

    /// Highest tick handed to a record slot.
    pub(crate) fn last_assigned_tick(&self) -> u64 {
        self.state.lock().last_assigned
    }

    /// Seed the tick bookkeeping during recovery.
    pub(crate) fn set_last_assigned_tick(&self, tick: u64) {
        let mut st = self.state.lock();
        st.last_assigned = tick;
        self.ticks.update(tick);
        self.last_committed.fetch_max(tick, Ordering::AcqRel);
    }

    /// Highest tick whose record, and all lower-tick records, are fsynced.
    pub(crate) fn durable_tick(&self) -> u64 {
        self.last_committed.load(Ordering::Acquire)
    }

    /// Refuse new work and release pending `wait_for_sync` waiters.
    pub(crate) fn initiate_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _st = self.state.lock();
        self.synced.notify_all();
        self.recycled.notify_all();
    }
}
