//! Error types for `journal`.

/// Result type for write-ahead log operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors returned at the write-ahead log boundary.
#[derive(thiserror::Error, Debug)]
pub enum JournalError {
    /// I/O error (create, fsync, unlink, map).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload exceeds the per-record maximum. Returned synchronously;
    /// no tick is consumed.
    #[error("record of {size} bytes exceeds maximum entry size of {max} bytes")]
    TooLarge {
        /// Requested record size (header included).
        size: u32,
        /// Maximum record size permitted by the logfile size.
        max: u32,
    },

    /// No writeable logfile after the bounded retry. May be transient
    /// (allocator catching up) or terminal (disk full); callers decide
    /// whether to retry.
    #[error("no logfile with enough free space available")]
    OutOfSpace,

    /// A logfile's content failed validation during open/recovery.
    #[error("corrupt record in logfile {logfile_id} at offset {offset}: {reason}")]
    CorruptRecord {
        /// Id of the affected logfile.
        logfile_id: u64,
        /// Byte offset of the first invalid record.
        offset: u64,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// The manager refuses new work because shutdown has begun.
    #[error("write-ahead log is shutting down")]
    ShuttingDown,

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid state (operation not allowed in current state).
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Unrecoverable background failure (reserve creation failed, consumer
    /// reported fatal, invariant violated). Triggers orderly shutdown.
    #[error("fatal write-ahead log failure: {0}")]
    Fatal(String),
}
