//! Filesystem primitives with stable-storage barriers.
//!
//! Vocabulary note:
//! - Flushing a mapping is a visibility boundary; stable-storage
//!   **durability** (survives power loss after reporting success)
//!   additionally requires explicit `fsync`/`sync_all` barriers and, for
//!   durable creates/renames/unlinks, syncing the parent directory.

use crate::error::JournalResult;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// Preallocate a zero-filled file of exactly `size` bytes, synced to disk.
///
/// Fails if the file already exists; logfile ids are unique, so a name
/// collision means a corrupted inventory rather than a retryable race.
pub fn create_fixed_size_file(path: &Path, size: u64) -> JournalResult<File> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(path)?;
    file.set_len(size)?;
    file.sync_all()?;
    Ok(file)
}

/// `fsync` a directory so entry creations/removals inside it survive power
/// loss. Filesystems that cannot sync directories are treated as a no-op.
pub fn fsync_dir(path: &Path) -> JournalResult<()> {
    let file = File::open(path)?;
    match file.sync_all() {
        Ok(()) => Ok(()),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::Unsupported | io::ErrorKind::PermissionDenied
            ) =>
        {
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// Write `data` to `path` with explicit durability barriers:
/// temp file → fsync → atomic rename → parent directory fsync.
///
/// Any failure is surfaced to the caller; the temp file is cleaned up on
/// the error paths.
pub fn write_file_durable(path: &Path, data: &[u8]) -> JournalResult<()> {
    let tmp = path.with_extension("tmp");

    if let Err(e) = (|| -> JournalResult<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(data)?;
        f.sync_all()?;
        Ok(())
    })() {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }

    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    if let Some(parent) = path.parent() {
        fsync_dir(parent)?;
    }
    Ok(())
}
