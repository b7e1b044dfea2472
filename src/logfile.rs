//! A single fixed-size, memory-mapped logfile.
//!
//! Logfiles are preallocated at a fixed size, named `logfile-<id>.db`, and
//! written through a shared mapping. Writers touch disjoint reserved
//! regions, so payload writes need no per-file lock; the append cursor and
//! status live behind a small mutex.
//!
//! Status machine:
//!
//! ```text
//! EMPTY → OPEN → SEAL_REQUESTED → SEALED → COLLECTION_REQUESTED → COLLECTED
//! ```
//!
//! Only `EMPTY`/`OPEN` accept reservations. `SEAL_REQUESTED` permits no new
//! reservations but may still have slots in flight. `SEALED` guarantees all
//! slots are returned and the content is on stable storage. Once sealed,
//! the `used` cursor is frozen.

use crate::error::{JournalError, JournalResult};
use crate::marker::{
    self, MarkerKind, MarkerView, FOOTER_MARKER_SIZE, FORMAT_VERSION, HEADER_MARKER_SIZE,
};
use crate::storage::create_fixed_size_file;
use memmap2::MmapMut;
use parking_lot::Mutex;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::ptr;
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use tracing::warn;

/// Lifecycle status of a logfile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogfileStatus {
    /// Preallocated, no payload markers yet.
    Empty,
    /// Accepting reservations.
    Open,
    /// No new reservations; outstanding slots may still drain.
    SealRequested,
    /// Immutable, footer written, content fsynced.
    Sealed,
    /// The collector is (re)playing this logfile downstream.
    CollectionRequested,
    /// A downstream consumer has durably absorbed the content.
    Collected,
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Reserve {
    /// Region granted at the returned offset.
    Granted(u32),
    /// The record does not fit the remaining space; the logfile moved to
    /// `SealRequested` and the caller must retry elsewhere.
    Full,
    /// The logfile is not in a writeable status.
    NotWriteable,
}

struct LogfileState {
    status: LogfileStatus,
    used: u32,
}

/// One fixed-size write-ahead logfile.
pub struct Logfile {
    id: u64,
    path: PathBuf,
    capacity: u32,
    data: MappedFile,
    state: Mutex<LogfileState>,
    /// Slots reserved here and not yet recycled by the synchronizer.
    outstanding: AtomicU32,
    /// Highest tick assigned into this logfile (the id if none).
    highest_tick: AtomicU64,
}

impl Logfile {
    /// Preallocate a zero-filled logfile of exactly `size` bytes, map it,
    /// and write the header marker at offset 0.
    pub fn create(path: &Path, id: u64, size: u32) -> JournalResult<Self> {
        let file = create_fixed_size_file(path, size as u64)?;
        let data = MappedFile::map(path, file, size)?;

        let mut header = [0u8; HEADER_MARKER_SIZE];
        marker::encode_header_marker(&mut header, id, id);
        data.write_bytes(0, &header)?;
        data.flush_range(0, HEADER_MARKER_SIZE)?;

        Ok(Self {
            id,
            path: path.to_path_buf(),
            capacity: size,
            data,
            state: Mutex::new(LogfileState {
                status: LogfileStatus::Empty,
                used: HEADER_MARKER_SIZE as u32,
            }),
            outstanding: AtomicU32::new(0),
            highest_tick: AtomicU64::new(id),
        })
    }

    /// Map an existing logfile and rebuild its append cursor by walking
    /// markers forward until the first invalid one.
    ///
    /// Trailing garbage after the last valid marker is zeroed so a later
    /// append continues from a clean tail. Returns the logfile and the
    /// highest tick observed in it.
    pub fn open(path: &Path, id: u64) -> JournalResult<(Self, u64)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        let capacity = u32::try_from(len).map_err(|_| JournalError::CorruptRecord {
            logfile_id: id,
            offset: 0,
            reason: format!("file length {len} exceeds the supported logfile size"),
        })?;
        let data = MappedFile::map(path, file, capacity)?;

        let bytes = data.read_slice(0, capacity as usize)?;
        let head = marker::parse_marker(bytes).ok_or_else(|| JournalError::CorruptRecord {
            logfile_id: id,
            offset: 0,
            reason: "missing or corrupt header marker".into(),
        })?;
        if head.kind != MarkerKind::Header {
            return Err(JournalError::CorruptRecord {
                logfile_id: id,
                offset: 0,
                reason: format!("unexpected marker type {:?} at offset 0", head.kind),
            });
        }
        match marker::decode_header_payload(head.payload) {
            Some((FORMAT_VERSION, header_id)) if header_id == id => {}
            Some((version, header_id)) => {
                return Err(JournalError::CorruptRecord {
                    logfile_id: id,
                    offset: 0,
                    reason: format!(
                        "header mismatch (version {version}, id {header_id}, expected id {id})"
                    ),
                });
            }
            None => {
                return Err(JournalError::CorruptRecord {
                    logfile_id: id,
                    offset: 0,
                    reason: "short header marker payload".into(),
                });
            }
        }

        let mut offset = head.size as usize;
        let mut highest_tick = head.tick.max(id);
        let mut sealed = false;

        while offset < capacity as usize {
            match marker::parse_marker(&bytes[offset..]) {
                Some(view) if view.kind == MarkerKind::Footer => {
                    offset += view.size as usize;
                    highest_tick = highest_tick.max(view.tick);
                    sealed = true;
                    break;
                }
                // A header marker past offset 0, or a tick regression,
                // terminates the valid suffix like any other corruption.
                Some(view) if view.kind == MarkerKind::Header => break,
                Some(view) if view.tick <= highest_tick => break,
                Some(view) => {
                    highest_tick = view.tick;
                    offset += view.size as usize;
                }
                None => break,
            }
        }

        let used = offset as u32;
        if !sealed && bytes[offset..].iter().any(|b| *b != 0) {
            warn!(
                logfile_id = id,
                offset, "zeroing trailing garbage after the last valid record"
            );
            data.zero_range(offset, capacity as usize)?;
            data.flush_range(offset, capacity as usize - offset)?;
        }

        let status = if sealed {
            LogfileStatus::Sealed
        } else if used as usize > HEADER_MARKER_SIZE {
            LogfileStatus::Open
        } else {
            LogfileStatus::Empty
        };

        Ok((
            Self {
                id,
                path: path.to_path_buf(),
                capacity,
                data,
                state: Mutex::new(LogfileState { status, used }),
                outstanding: AtomicU32::new(0),
                highest_tick: AtomicU64::new(highest_tick),
            },
            highest_tick,
        ))
    }

    /// Logfile id (the tick assigned at creation).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Filesystem path of this logfile.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Total file size in bytes.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Current append cursor.
    pub fn used(&self) -> u32 {
        self.state.lock().used
    }

    /// Bytes still reservable (footer reserve excluded).
    pub fn free_size(&self) -> u32 {
        let st = self.state.lock();
        self.capacity
            .saturating_sub(st.used)
            .saturating_sub(FOOTER_MARKER_SIZE as u32)
    }

    /// Current lifecycle status.
    pub fn status(&self) -> LogfileStatus {
        self.state.lock().status
    }

    /// Highest tick assigned into this logfile.
    pub fn highest_tick(&self) -> u64 {
        self.highest_tick.load(Ordering::Acquire)
    }

    /// Whether a record of `size` bytes could be reserved here right now.
    pub fn is_writeable(&self, size: u32) -> bool {
        let st = self.state.lock();
        matches!(st.status, LogfileStatus::Empty | LogfileStatus::Open)
            && st.used as u64 + size as u64 + FOOTER_MARKER_SIZE as u64 <= self.capacity as u64
    }

    /// Whether the synchronizer may seal this logfile: sealing was
    /// requested and every slot reserved here has been synced and recycled.
    pub fn can_be_sealed(&self) -> bool {
        self.state.lock().status == LogfileStatus::SealRequested
            && self.outstanding.load(Ordering::Acquire) == 0
    }

    /// Whether the collector may pick this logfile.
    pub fn can_be_collected(&self) -> bool {
        matches!(
            self.state.lock().status,
            LogfileStatus::Sealed | LogfileStatus::CollectionRequested
        )
    }

    /// Whether the manager may delete this logfile.
    pub fn can_be_removed(&self) -> bool {
        self.state.lock().status == LogfileStatus::Collected
    }

    /// Try to reserve `len` bytes. On a partial fit the logfile
    /// transitions to `SealRequested` and the caller retries elsewhere.
    pub(crate) fn reserve(&self, len: u32) -> Reserve {
        let mut st = self.state.lock();
        match st.status {
            LogfileStatus::Empty | LogfileStatus::Open => {
                if st.used as u64 + len as u64 + FOOTER_MARKER_SIZE as u64 <= self.capacity as u64 {
                    let offset = st.used;
                    st.used += len;
                    st.status = LogfileStatus::Open;
                    Reserve::Granted(offset)
                } else {
                    st.status = LogfileStatus::SealRequested;
                    Reserve::Full
                }
            }
            _ => Reserve::NotWriteable,
        }
    }

    /// Record that a slot with `tick` was reserved here.
    pub(crate) fn note_reservation(&self, tick: u64) {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.highest_tick.fetch_max(tick, Ordering::AcqRel);
    }

    /// Record that a slot reserved here was synced and recycled.
    pub(crate) fn note_recycled(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "recycled more slots than were reserved");
    }

    /// Transition to an explicit status under the caller's coordination.
    pub(crate) fn set_status(&self, status: LogfileStatus) {
        self.state.lock().status = status;
    }

    /// Request sealing of a writeable logfile.
    pub(crate) fn request_sealing(&self) {
        let mut st = self.state.lock();
        if matches!(st.status, LogfileStatus::Empty | LogfileStatus::Open) {
            st.status = LogfileStatus::SealRequested;
        }
    }

    /// Write the footer marker, flush it, and freeze the logfile.
    ///
    /// Preconditions (checked): sealing was requested and no slots are
    /// outstanding; the synchronizer has already made the payload prefix
    /// durable before recycling those slots.
    pub(crate) fn seal(&self) -> JournalResult<()> {
        let mut st = self.state.lock();
        if st.status != LogfileStatus::SealRequested {
            return Err(JournalError::InvalidState(format!(
                "cannot seal logfile {} in status {:?}",
                self.id, st.status
            )));
        }
        if self.outstanding.load(Ordering::Acquire) != 0 {
            return Err(JournalError::InvalidState(format!(
                "cannot seal logfile {} with slots in flight",
                self.id
            )));
        }

        let offset = st.used as usize;
        let mut footer = [0u8; FOOTER_MARKER_SIZE];
        marker::encode_into(
            &mut footer,
            MarkerKind::Footer,
            self.highest_tick.load(Ordering::Acquire),
            &[],
        );
        self.data.write_bytes(offset, &footer)?;
        self.data.flush_range(offset, FOOTER_MARKER_SIZE)?;

        st.used += FOOTER_MARKER_SIZE as u32;
        st.status = LogfileStatus::Sealed;
        self.data.mark_read_only();
        Ok(())
    }

    /// Mutable view of a reserved region. Callers must only touch regions
    /// they reserved; reservation disjointness is what makes the aliasing
    /// sound.
    pub(crate) fn slot_mem(&self, offset: u32, len: u32) -> JournalResult<&mut [u8]> {
        self.data.slice_mut(offset as usize, len as usize)
    }

    /// Push a byte range of the mapping to stable storage.
    pub(crate) fn sync_range(&self, offset: u32, len: u32) -> JournalResult<()> {
        self.data.flush_range(offset as usize, len as usize)
    }

    /// Flush the whole mapping.
    pub(crate) fn flush_all(&self) -> JournalResult<()> {
        self.data.flush()
    }

    /// Iterate the valid markers of this logfile in offset order.
    ///
    /// Intended for sealed or quiescent logfiles; concurrent writers to
    /// other regions do not disturb the walk, but the iterator stops at the
    /// first marker that does not validate.
    pub fn records(&self) -> JournalResult<RecordIter<'_>> {
        let used = self.state.lock().used;
        let bytes = self.data.read_slice(0, used as usize)?;
        Ok(RecordIter { bytes, offset: 0 })
    }
}

impl std::fmt::Debug for Logfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logfile")
            .field("id", &self.id)
            .field("status", &self.status())
            .field("used", &self.used())
            .field("capacity", &self.capacity)
            .finish()
    }
}

/// One decoded marker yielded by [`Logfile::records`].
#[derive(Debug, Clone, Copy)]
pub struct RecordView<'a> {
    /// Byte offset of the marker inside the logfile.
    pub offset: u32,
    /// The validated marker.
    pub marker: MarkerView<'a>,
}

/// Forward walk over a logfile's valid markers.
pub struct RecordIter<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for RecordIter<'a> {
    type Item = RecordView<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let view = marker::parse_marker(&self.bytes[self.offset..])?;
        let offset = self.offset as u32;
        self.offset += view.size as usize;
        Some(RecordView {
            offset,
            marker: view,
        })
    }
}

/// Shared mapping over one logfile.
///
/// Concurrent writers obtain mutable slices into disjoint regions through a
/// raw pointer; the slots ring guarantees disjointness, the `Mutex<MmapMut>`
/// is only taken for flushes.
struct MappedFile {
    path: PathBuf,
    mmap: Mutex<MmapMut>,
    data: AtomicPtr<u8>,
    capacity: u32,
    writable: AtomicBool,
}

unsafe impl Send for MappedFile {}
unsafe impl Sync for MappedFile {}

impl MappedFile {
    fn map(path: &Path, file: std::fs::File, capacity: u32) -> JournalResult<Self> {
        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if mmap.len() != capacity as usize {
            return Err(JournalError::InvalidState(format!(
                "mapping of {} is {} bytes, expected {}",
                path.display(),
                mmap.len(),
                capacity
            )));
        }
        let data = mmap.as_mut_ptr();
        Ok(Self {
            path: path.to_path_buf(),
            mmap: Mutex::new(mmap),
            data: AtomicPtr::new(data),
            capacity,
            writable: AtomicBool::new(true),
        })
    }

    fn check_range(&self, offset: usize, len: usize) -> JournalResult<()> {
        let end = offset.checked_add(len);
        if end.map_or(true, |end| end > self.capacity as usize) {
            return Err(JournalError::InvalidState(format!(
                "range {offset}+{len} out of bounds for {}",
                self.path.display()
            )));
        }
        Ok(())
    }

    fn write_bytes(&self, offset: usize, bytes: &[u8]) -> JournalResult<()> {
        self.check_range(offset, bytes.len())?;
        if !self.writable.load(Ordering::Acquire) {
            return Err(JournalError::InvalidState(format!(
                "write to sealed mapping {}",
                self.path.display()
            )));
        }
        let ptr = self.data.load(Ordering::Acquire);
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    fn zero_range(&self, start: usize, end: usize) -> JournalResult<()> {
        self.check_range(start, end - start)?;
        let ptr = self.data.load(Ordering::Acquire);
        unsafe {
            ptr::write_bytes(ptr.add(start), 0, end - start);
        }
        Ok(())
    }

    fn read_slice(&self, offset: usize, len: usize) -> JournalResult<&[u8]> {
        self.check_range(offset, len)?;
        let ptr = self.data.load(Ordering::Acquire);
        unsafe { Ok(slice::from_raw_parts(ptr.add(offset), len)) }
    }

    #[allow(clippy::mut_from_ref)]
    fn slice_mut(&self, offset: usize, len: usize) -> JournalResult<&mut [u8]> {
        self.check_range(offset, len)?;
        if !self.writable.load(Ordering::Acquire) {
            return Err(JournalError::InvalidState(format!(
                "write to sealed mapping {}",
                self.path.display()
            )));
        }
        let ptr = self.data.load(Ordering::Acquire);
        unsafe { Ok(slice::from_raw_parts_mut(ptr.add(offset), len)) }
    }

    fn flush_range(&self, offset: usize, len: usize) -> JournalResult<()> {
        self.check_range(offset, len)?;
        let guard = self.mmap.lock();
        guard.flush_range(offset, len)?;
        Ok(())
    }

    fn flush(&self) -> JournalResult<()> {
        let guard = self.mmap.lock();
        guard.flush()?;
        Ok(())
    }

    fn mark_read_only(&self) {
        self.writable.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::{marker_size, MARKER_HEADER_SIZE};

    fn write_record(lf: &Logfile, tick: u64, payload: &[u8]) -> u32 {
        let total = marker_size(payload.len()) as u32;
        let offset = match lf.reserve(total) {
            Reserve::Granted(o) => o,
            other => panic!("reserve failed: {other:?}"),
        };
        lf.note_reservation(tick);
        let mem = lf.slot_mem(offset, total).unwrap();
        marker::encode_into(mem, MarkerKind::Document, tick, payload);
        lf.note_recycled();
        offset
    }

    #[test]
    fn create_starts_empty_with_header_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-7.db");
        let lf = Logfile::create(&path, 7, 4096).unwrap();

        assert_eq!(lf.status(), LogfileStatus::Empty);
        assert_eq!(lf.used() as usize, HEADER_MARKER_SIZE);

        let records: Vec<_> = lf.records().unwrap().collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].marker.kind, MarkerKind::Header);
        assert_eq!(records[0].marker.tick, 7);
    }

    #[test]
    fn open_rebuilds_cursor_after_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-3.db");
        let used;
        {
            let lf = Logfile::create(&path, 3, 4096).unwrap();
            write_record(&lf, 10, b"first");
            write_record(&lf, 11, b"second");
            lf.flush_all().unwrap();
            used = lf.used();
        }

        let (reopened, highest) = Logfile::open(&path, 3).unwrap();
        assert_eq!(reopened.status(), LogfileStatus::Open);
        assert_eq!(reopened.used(), used);
        assert_eq!(highest, 11);
    }

    #[test]
    fn open_truncates_at_corruption_and_zeroes_the_tail() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-5.db");
        let first_end;
        {
            let lf = Logfile::create(&path, 5, 4096).unwrap();
            let off = write_record(&lf, 20, b"keep me");
            first_end = off + marker_size(7) as u32;
            write_record(&lf, 21, b"lose me");
            lf.flush_all().unwrap();
        }

        // Flip one byte inside the second record's payload.
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[first_end as usize + MARKER_HEADER_SIZE] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let (reopened, highest) = Logfile::open(&path, 5).unwrap();
        assert_eq!(reopened.used(), first_end);
        assert_eq!(highest, 20);

        // The corrupted suffix was zeroed on disk.
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes[first_end as usize..].iter().all(|b| *b == 0));
    }

    #[test]
    fn open_rejects_corrupt_header_marker() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-9.db");
        {
            let lf = Logfile::create(&path, 9, 4096).unwrap();
            lf.flush_all().unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            Logfile::open(&path, 9),
            Err(JournalError::CorruptRecord { logfile_id: 9, .. })
        ));
    }

    #[test]
    fn partial_fit_requests_sealing() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-2.db");
        let lf = Logfile::create(&path, 2, 256).unwrap();

        // Fits: capacity 256 - header 32 - footer reserve 24 = 200 usable.
        assert!(matches!(lf.reserve(96), Reserve::Granted(_)));
        lf.note_reservation(30);
        // 104 left; 112 does not fit and must flip the status.
        assert_eq!(lf.reserve(112), Reserve::Full);
        assert_eq!(lf.status(), LogfileStatus::SealRequested);
        // Subsequent attempts see a non-writeable logfile.
        assert_eq!(lf.reserve(8), Reserve::NotWriteable);
    }

    #[test]
    fn seal_writes_footer_and_freezes_the_cursor() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-4.db");
        let lf = Logfile::create(&path, 4, 4096).unwrap();
        write_record(&lf, 40, b"payload");
        lf.request_sealing();
        assert!(lf.can_be_sealed());
        lf.seal().unwrap();

        assert_eq!(lf.status(), LogfileStatus::Sealed);
        let used = lf.used();

        let records: Vec<_> = lf.records().unwrap().collect();
        let last = records.last().unwrap();
        assert_eq!(last.marker.kind, MarkerKind::Footer);
        assert_eq!(last.marker.tick, 40);

        // Reopening classifies the file as sealed at the same cursor.
        drop(lf);
        let (reopened, _) = Logfile::open(&path, 4).unwrap();
        assert_eq!(reopened.status(), LogfileStatus::Sealed);
        assert_eq!(reopened.used(), used);
    }

    #[test]
    fn seal_refuses_outstanding_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logfile-6.db");
        let lf = Logfile::create(&path, 6, 4096).unwrap();
        let total = marker_size(4) as u32;
        let offset = match lf.reserve(total) {
            Reserve::Granted(o) => o,
            other => panic!("reserve failed: {other:?}"),
        };
        lf.note_reservation(60);
        let mem = lf.slot_mem(offset, total).unwrap();
        marker::encode_into(mem, MarkerKind::Document, 60, b"abcd");

        lf.request_sealing();
        assert!(!lf.can_be_sealed());
        assert!(lf.seal().is_err());

        lf.note_recycled();
        assert!(lf.can_be_sealed());
        lf.seal().unwrap();
    }
}
