//! E2E test: a clean write → stop → restart cycle.
//!
//! Covers the steady-state contract: every record written before a clean
//! stop is replayable after restart, the tick sequence never repeats, and
//! the shutdown marker is consumed by the restart.

mod support;

use journal::{JournalConfig, LogfileManager, MarkerKind};
use std::sync::Arc;
use std::time::Duration;
use support::ReluctantConsumer;

// The deferring consumer keeps every logfile replayable across the restart.
fn config(dir: &std::path::Path) -> JournalConfig {
    support::small_config(dir).collector_interval(Duration::from_millis(50))
}

fn payload(i: usize) -> Vec<u8> {
    // 108 payload bytes -> 128-byte records including header and padding.
    let mut p = vec![0u8; 108];
    p[..8].copy_from_slice(&(i as u64).to_le_bytes());
    p
}

#[test]
fn thousand_records_survive_clean_restart() {
    let tmp = tempfile::tempdir().unwrap();

    let mut written_ticks = Vec::new();
    {
        let manager = LogfileManager::new(
            config(tmp.path()),
            Arc::new(ReluctantConsumer::new(usize::MAX)),
        )
        .unwrap();
        manager.start().unwrap();

        for i in 0..1000 {
            let tick = manager
                .allocate_and_write(MarkerKind::Document, &payload(i), false)
                .unwrap();
            written_ticks.push(tick);
        }
        let last_tick = manager.last_assigned_tick();
        assert_eq!(last_tick, *written_ticks.last().unwrap());

        manager.stop().unwrap();
        assert!(tmp.path().join("SHUTDOWN").exists());
    }

    let manager = LogfileManager::new(
        config(tmp.path()),
        Arc::new(ReluctantConsumer::new(usize::MAX)),
    )
    .unwrap();
    manager.start().unwrap();

    // The restart consumed the shutdown marker.
    assert!(!tmp.path().join("SHUTDOWN").exists());

    // Every record is replayable, in tick order, with the original bytes.
    let mut replayed = Vec::new();
    for logfile in manager.logfiles() {
        for record in logfile.records().unwrap() {
            if record.marker.kind == MarkerKind::Document {
                replayed.push((record.marker.tick, record.marker.payload.to_vec()));
            }
        }
    }
    assert_eq!(replayed.len(), 1000);
    for window in replayed.windows(2) {
        assert!(window[0].0 < window[1].0, "ticks must be strictly increasing");
    }
    for (i, (tick, bytes)) in replayed.iter().enumerate() {
        assert_eq!(*tick, written_ticks[i]);
        assert_eq!(&bytes[..108], &payload(i)[..]);
    }

    // The tick sequence continues past the previous session.
    let next = manager
        .allocate_and_write(MarkerKind::Document, b"after restart", false)
        .unwrap();
    assert!(next > *written_ticks.last().unwrap());

    manager.stop().unwrap();
}

#[test]
fn stop_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LogfileManager::new(
        config(tmp.path()),
        Arc::new(ReluctantConsumer::new(usize::MAX)),
    )
    .unwrap();
    manager.start().unwrap();
    manager
        .allocate_and_write(MarkerKind::Document, b"once", true)
        .unwrap();

    manager.stop().unwrap();
    manager.stop().unwrap();
    assert!(tmp.path().join("SHUTDOWN").exists());
}

#[test]
fn writes_after_stop_are_refused() {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LogfileManager::new(
        config(tmp.path()),
        Arc::new(ReluctantConsumer::new(usize::MAX)),
    )
    .unwrap();
    manager.start().unwrap();
    manager.stop().unwrap();

    let err = manager
        .allocate_and_write(MarkerKind::Document, b"too late", false)
        .unwrap_err();
    assert!(matches!(err, journal::JournalError::ShuttingDown));
}
