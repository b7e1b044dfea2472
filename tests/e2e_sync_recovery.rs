//! E2E test: a synced write survives an unclean shutdown.
//!
//! Dropping the manager without `stop` models a crash: the worker threads
//! are torn down but no shutdown marker is written, so the next start must
//! recover by CRC-walking the logfiles.

mod support;

use journal::{LogfileManager, MarkerKind};
use std::sync::Arc;
use support::{small_config, ReluctantConsumer};

#[test]
fn synced_record_survives_crash_without_stop() {
    let tmp = tempfile::tempdir().unwrap();

    let tick;
    {
        let manager = LogfileManager::new(
            small_config(tmp.path()),
            Arc::new(ReluctantConsumer::new(usize::MAX)),
        )
        .unwrap();
        manager.start().unwrap();

        tick = manager
            .allocate_and_write(MarkerKind::Document, b"must survive", true)
            .unwrap();
        assert!(manager.durable_tick() >= tick);

        // Crash: no stop() call, no shutdown marker.
    }
    assert!(!tmp.path().join("SHUTDOWN").exists());

    let manager = LogfileManager::new(
        small_config(tmp.path()),
        Arc::new(ReluctantConsumer::new(usize::MAX)),
    )
    .unwrap();
    manager.start().unwrap();

    let mut found = None;
    for logfile in manager.logfiles() {
        for record in logfile.records().unwrap() {
            if record.marker.kind == MarkerKind::Document && record.marker.tick == tick {
                found = Some(record.marker.payload.to_vec());
            }
        }
    }
    let payload = found.expect("synced record must be recovered");
    assert_eq!(&payload[..12], b"must survive");

    // Recovery classifies everything on disk as durable.
    assert!(manager.durable_tick() >= tick);
    // New ticks never collide with recovered ones.
    let next = manager
        .allocate_and_write(MarkerKind::Document, b"after recovery", false)
        .unwrap();
    assert!(next > tick);

    manager.stop().unwrap();
}

#[test]
fn unsynced_tail_may_be_lost_but_never_corrupts_the_prefix() {
    let tmp = tempfile::tempdir().unwrap();

    let synced_tick;
    {
        let manager = LogfileManager::new(
            small_config(tmp.path()),
            Arc::new(ReluctantConsumer::new(usize::MAX)),
        )
        .unwrap();
        manager.start().unwrap();

        synced_tick = manager
            .allocate_and_write(MarkerKind::Document, b"synced", true)
            .unwrap();
        // Unsynced writes racing the crash; they may or may not survive.
        for _ in 0..10 {
            manager
                .allocate_and_write(MarkerKind::Document, b"racing", false)
                .unwrap();
        }
    }

    let manager = LogfileManager::new(
        small_config(tmp.path()),
        Arc::new(ReluctantConsumer::new(usize::MAX)),
    )
    .unwrap();
    manager.start().unwrap();

    let mut ticks = Vec::new();
    for logfile in manager.logfiles() {
        for record in logfile.records().unwrap() {
            if record.marker.kind == MarkerKind::Document {
                ticks.push(record.marker.tick);
            }
        }
    }
    assert!(ticks.contains(&synced_tick));
    for window in ticks.windows(2) {
        assert!(window[0] < window[1]);
    }

    manager.stop().unwrap();
}
