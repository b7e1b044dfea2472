//! Minimal consumer example for `journal`.
//!
//! This does **not** implement a storage engine. It exercises the
//! write-ahead log machinery:
//! - record writes with and without `wait_for_sync`
//! - background sealing and collection
//! - a clean stop with a shutdown marker
//!
//! Run (after moving this file to a Cargo `examples/` directory):
//! `cargo run --example wal_lifecycle`

use journal::{
    ConsumerOutcome, JournalConfig, LogConsumer, LogfileManager, MarkerKind,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct PrintingConsumer {
    seen: AtomicUsize,
}

impl LogConsumer for PrintingConsumer {
    fn consume(&self, logfile_id: u64, kind: MarkerKind, tick: u64, payload: &[u8]) -> ConsumerOutcome {
        let n = self.seen.fetch_add(1, Ordering::AcqRel) + 1;
        if n % 100 == 0 {
            println!("collected {n} records (logfile {logfile_id}, {kind:?}, tick {tick}, {} bytes)", payload.len());
        }
        ConsumerOutcome::Ok
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let tmp = tempfile::tempdir()?;
    let config = JournalConfig::new(tmp.path())
        .logfile_size(64 * 1024)
        .reserve_logfiles(2)
        .historic_logfiles(1)
        .collector_interval(Duration::from_millis(100));

    let consumer = Arc::new(PrintingConsumer {
        seen: AtomicUsize::new(0),
    });
    let manager = LogfileManager::new(config, consumer.clone())?;
    manager.start()?;

    for i in 0..500u64 {
        let payload = format!("document number {i}");
        manager.allocate_and_write(MarkerKind::Document, payload.as_bytes(), false)?;
    }
    let tick = manager.allocate_and_write(MarkerKind::Document, b"the durable one", true)?;
    println!("record {tick} is on stable storage (durable tick {})", manager.durable_tick());

    // Let the collector churn through the sealed logfiles.
    std::thread::sleep(Duration::from_millis(500));
    println!("last collected logfile: {}", manager.last_collected());

    manager.stop()?;
    println!("clean shutdown, marker written");
    Ok(())
}
