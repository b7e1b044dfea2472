//! Write-ahead log configuration.

use crate::error::{JournalError, JournalResult};
use crate::marker::{FOOTER_MARKER_SIZE, HEADER_MARKER_SIZE, MARKER_HEADER_SIZE};
use std::path::PathBuf;
use std::time::Duration;

/// Default size of every logfile (32 MiB).
pub const DEFAULT_LOGFILE_SIZE: u32 = 32 * 1024 * 1024;

/// Default number of writeable reserve logfiles the allocator maintains.
pub const DEFAULT_RESERVE_LOGFILES: usize = 3;

/// Default number of collected logfiles retained before deletion.
pub const DEFAULT_HISTORIC_LOGFILES: usize = 10;

/// Default capacity of the slots ring.
pub const DEFAULT_SLOT_COUNT: usize = 1_048_576;

/// Configuration for opening a write-ahead log.
#[derive(Debug, Clone)]
pub struct JournalConfig {
    /// Directory holding the logfiles and the shutdown marker. Created if
    /// absent.
    pub directory: PathBuf,

    /// Fixed byte size of every logfile.
    pub logfile_size: u32,

    /// Minimum number of writeable logfiles the allocator keeps on hand.
    pub reserve_logfiles: usize,

    /// Number of fully collected logfiles retained before removal.
    pub historic_logfiles: usize,

    /// Capacity of the slots ring; `allocate` blocks when it fills up.
    pub slot_count: usize,

    /// How often the synchronizer wakes without being signaled.
    pub sync_interval: Duration,

    /// How often the allocator checks the reserve count without being
    /// signaled.
    pub allocator_interval: Duration,

    /// How often the collector looks for sealed logfiles.
    pub collector_interval: Duration,
}

impl JournalConfig {
    /// Create a configuration for `directory` with default values.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            logfile_size: DEFAULT_LOGFILE_SIZE,
            reserve_logfiles: DEFAULT_RESERVE_LOGFILES,
            historic_logfiles: DEFAULT_HISTORIC_LOGFILES,
            slot_count: DEFAULT_SLOT_COUNT,
            sync_interval: Duration::from_millis(100),
            allocator_interval: Duration::from_millis(500),
            collector_interval: Duration::from_secs(1),
        }
    }

    /// Sets the fixed logfile size.
    #[must_use]
    pub fn logfile_size(mut self, bytes: u32) -> Self {
        self.logfile_size = bytes;
        self
    }

    /// Sets the number of reserve logfiles.
    #[must_use]
    pub fn reserve_logfiles(mut self, count: usize) -> Self {
        self.reserve_logfiles = count;
        self
    }

    /// Sets the number of historic logfiles kept after collection.
    #[must_use]
    pub fn historic_logfiles(mut self, count: usize) -> Self {
        self.historic_logfiles = count;
        self
    }

    /// Sets the slots ring capacity.
    #[must_use]
    pub fn slot_count(mut self, count: usize) -> Self {
        self.slot_count = count;
        self
    }

    /// Sets the synchronizer wakeup interval.
    #[must_use]
    pub fn sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Sets the allocator wakeup interval.
    #[must_use]
    pub fn allocator_interval(mut self, interval: Duration) -> Self {
        self.allocator_interval = interval;
        self
    }

    /// Sets the collector wakeup interval.
    #[must_use]
    pub fn collector_interval(mut self, interval: Duration) -> Self {
        self.collector_interval = interval;
        self
    }

    /// Largest record (header included) that fits a logfile of the
    /// configured size, leaving room for the header and footer markers.
    pub fn max_entry_size(&self) -> u32 {
        self.logfile_size
            .saturating_sub(HEADER_MARKER_SIZE as u32)
            .saturating_sub(FOOTER_MARKER_SIZE as u32)
    }

    /// Validate the configuration, returning `InvalidConfig` on violation.
    pub fn validate(&self) -> JournalResult<()> {
        if self.directory.as_os_str().is_empty() {
            return Err(JournalError::InvalidConfig(
                "no directory specified for write-ahead logs".into(),
            ));
        }
        let overhead = (HEADER_MARKER_SIZE + FOOTER_MARKER_SIZE + MARKER_HEADER_SIZE) as u32;
        if self.logfile_size < overhead {
            return Err(JournalError::InvalidConfig(format!(
                "logfile size {} is below the minimum of {} bytes",
                self.logfile_size, overhead
            )));
        }
        if self.slot_count < 2 {
            return Err(JournalError::InvalidConfig(
                "slot count must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = JournalConfig::new("/tmp/wal");
        cfg.validate().unwrap();
        assert_eq!(cfg.logfile_size, DEFAULT_LOGFILE_SIZE);
        assert_eq!(cfg.reserve_logfiles, DEFAULT_RESERVE_LOGFILES);
        assert_eq!(cfg.historic_logfiles, DEFAULT_HISTORIC_LOGFILES);
    }

    #[test]
    fn rejects_empty_directory() {
        let cfg = JournalConfig::new("");
        assert!(matches!(
            cfg.validate(),
            Err(JournalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_undersized_logfiles() {
        let cfg = JournalConfig::new("/tmp/wal").logfile_size(16);
        assert!(matches!(
            cfg.validate(),
            Err(JournalError::InvalidConfig(_))
        ));
    }

    #[test]
    fn max_entry_size_leaves_room_for_framing() {
        let cfg = JournalConfig::new("/tmp/wal").logfile_size(64 * 1024);
        let max = cfg.max_entry_size();
        assert!(max < 64 * 1024);
        assert!(max > 60 * 1024);
    }
}
