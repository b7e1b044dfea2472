//! The shutdown marker file.
//!
//! A clean `stop` leaves a small `SHUTDOWN` file next to the logfiles:
//! UTF-8 JSON `{"lastTick":"<u64>","lastCollected":"<u64>"}` with the
//! numbers stringified. Its presence on startup indicates a clean shutdown;
//! it is deleted after being read, so absence on the next start triggers
//! recovery.

use crate::error::{JournalError, JournalResult};
use crate::storage::write_file_durable;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the shutdown marker inside the log directory.
pub const SHUTDOWN_FILE: &str = "SHUTDOWN";

/// Content of the shutdown marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownMarker {
    /// Last tick handed out by the tick generator.
    #[serde(rename = "lastTick", with = "string_u64")]
    pub last_tick: u64,
    /// Id of the last fully collected logfile (0 if none).
    #[serde(rename = "lastCollected", with = "string_u64")]
    pub last_collected: u64,
}

impl ShutdownMarker {
    /// Path of the marker inside `directory`.
    pub fn path_in(directory: &Path) -> PathBuf {
        directory.join(SHUTDOWN_FILE)
    }

    /// Parse the marker file at `path`.
    pub fn read(path: &Path) -> JournalResult<Self> {
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            JournalError::InvalidState(format!(
                "unreadable shutdown marker {}: {e}",
                path.display()
            ))
        })
    }

    /// Write the marker with full durability barriers (file fsync, atomic
    /// rename, directory fsync). Failures are returned to the caller.
    pub fn write(&self, path: &Path) -> JournalResult<()> {
        let bytes = serde_json::to_vec(self).map_err(|e| {
            JournalError::InvalidState(format!("unencodable shutdown marker: {e}"))
        })?;
        write_file_durable(path, &bytes)
    }
}

mod string_u64 {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u64>().map_err(de::Error::custom)
    }
}
