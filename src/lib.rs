//! `journal`: the durable write-ahead log manager of a multi-model
//! database engine.
//!
//! Scope:
//! - fixed binary marker format with CRC32 integrity (`marker`)
//! - fixed-size, memory-mapped logfiles with a sealing lifecycle (`logfile`)
//! - multi-writer slot reservation with ordered release (`slots`)
//! - the logfile manager: inventory, recovery, public write API (`manager`)
//! - background allocator, synchronizer, and collector threads
//!
//! Non-goal: the semantics of what is written. Records are opaque payloads;
//! the downstream storage engine interprets them through its
//! [`LogConsumer`].
//!
//! ## Contract (what you can rely on)
//!
//! - **Ordering**: ticks are strictly increasing in reservation order;
//!   within a logfile, byte offset order equals tick order; a higher-id
//!   logfile only holds higher ticks than any lower-id logfile that was
//!   written to.
//! - **Durability**: once `finalise(_, wait_for_sync: true)` returns, the
//!   record and every lower-tick record are on stable storage. A reader
//!   observing `durable_tick() >= T` may assume every record with tick
//!   `<= T` is CRC-valid on disk.
//! - **Crash recovery**: on a start without a clean `SHUTDOWN` marker, the
//!   append cursor of every logfile is rebuilt by CRC-walking its markers;
//!   a torn or corrupt tail is zeroed and the valid prefix is kept.
//! - **Retention**: sealed logfiles are replayed into the consumer; once
//!   collected, only the most recent `historic_logfiles` of them are kept
//!   on disk.
//!
//! The manager never panics on disk errors encountered in normal
//! operation: per-call failures come back as [`JournalError`] values, and
//! background-thread failures are logged and, when unrecoverable, flip the
//! manager into a failed, shutting-down state.

pub mod collector;
pub mod config;
pub mod error;
pub mod logfile;
pub mod manager;
pub mod marker;
pub mod shutdown;
pub mod slots;
pub mod storage;
pub mod tick;

mod allocator;
mod inventory;
mod signal;
mod synchronizer;

pub use collector::{ConsumerOutcome, LogConsumer};
pub use config::JournalConfig;
pub use error::{JournalError, JournalResult};
pub use logfile::{Logfile, LogfileStatus, RecordIter, RecordView};
pub use manager::LogfileManager;
pub use marker::{marker_size, MarkerKind, MarkerView};
pub use shutdown::ShutdownMarker;
pub use slots::SlotReservation;
pub use tick::TickGenerator;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct DiscardConsumer;

    impl LogConsumer for DiscardConsumer {
        fn consume(
            &self,
            _logfile_id: u64,
            _kind: MarkerKind,
            _tick: u64,
            _payload: &[u8],
        ) -> ConsumerOutcome {
            ConsumerOutcome::Ok
        }
    }

    fn test_config(dir: &std::path::Path) -> JournalConfig {
        JournalConfig::new(dir)
            .logfile_size(64 * 1024)
            .reserve_logfiles(2)
            .historic_logfiles(2)
            .slot_count(1024)
    }

    #[test]
    fn write_stop_restart_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();

        let first_tick;
        let last_tick;
        {
            let manager =
                LogfileManager::new(test_config(tmp.path()), Arc::new(DiscardConsumer)).unwrap();
            manager.start().unwrap();

            first_tick = manager
                .allocate_and_write(MarkerKind::Document, b"alpha", false)
                .unwrap();
            manager
                .allocate_and_write(MarkerKind::Deletion, b"beta", false)
                .unwrap();
            last_tick = manager
                .allocate_and_write(MarkerKind::Document, b"gamma", true)
                .unwrap();
            assert!(first_tick < last_tick);
            assert!(manager.durable_tick() >= last_tick);

            manager.stop().unwrap();
        }

        let manager =
            LogfileManager::new(test_config(tmp.path()), Arc::new(DiscardConsumer)).unwrap();
        manager.start().unwrap();

        // The tick sequence continues past everything written before.
        let next = manager
            .allocate_and_write(MarkerKind::Document, b"delta", false)
            .unwrap();
        assert!(next > last_tick);

        let payload_ticks: Vec<u64> = manager
            .logfiles()
            .iter()
            .flat_map(|lf| {
                lf.records()
                    .unwrap()
                    .filter(|r| {
                        matches!(r.marker.kind, MarkerKind::Document | MarkerKind::Deletion)
                    })
                    .map(|r| r.marker.tick)
                    .collect::<Vec<_>>()
            })
            .collect();
        assert!(payload_ticks.contains(&first_tick));
        assert!(payload_ticks.contains(&last_tick));
        assert!(payload_ticks.contains(&next));

        manager.stop().unwrap();
    }

    #[test]
    fn oversized_records_are_rejected_without_consuming_a_tick() {
        let tmp = tempfile::tempdir().unwrap();
        let manager =
            LogfileManager::new(test_config(tmp.path()), Arc::new(DiscardConsumer)).unwrap();
        manager.start().unwrap();

        let before = manager.last_assigned_tick();
        let oversized = vec![0u8; manager.max_entry_size() as usize + 1];
        let err = manager
            .allocate_and_write(MarkerKind::Document, &oversized, false)
            .unwrap_err();
        assert!(matches!(err, JournalError::TooLarge { .. }));
        assert_eq!(manager.last_assigned_tick(), before);

        manager.stop().unwrap();
    }
}
