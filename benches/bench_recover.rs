//! Benchmark for the restart path (inventory + CRC-walk of every logfile).
#![allow(missing_docs)]

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use journal::{ConsumerOutcome, JournalConfig, LogConsumer, LogfileManager, MarkerKind};
use std::sync::Arc;
use std::time::Duration;

struct DiscardConsumer;

impl LogConsumer for DiscardConsumer {
    fn consume(&self, _: u64, _: MarkerKind, _: u64, _: &[u8]) -> ConsumerOutcome {
        ConsumerOutcome::Ok
    }
}

fn bench_config(dir: &std::path::Path) -> JournalConfig {
    JournalConfig::new(dir)
        .logfile_size(1024 * 1024)
        .reserve_logfiles(2)
        .historic_logfiles(10)
        .slot_count(65_536)
        .collector_interval(Duration::from_secs(3600))
}

fn populated_dir(records: usize) -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    let manager = LogfileManager::new(bench_config(tmp.path()), Arc::new(DiscardConsumer)).unwrap();
    manager.start().unwrap();
    let payload = vec![0xA5u8; 236];
    for _ in 0..records {
        manager
            .allocate_and_write(MarkerKind::Document, &payload, false)
            .unwrap();
    }
    manager.stop().unwrap();
    // Force the full rescan path rather than the clean-shutdown shortcut.
    std::fs::remove_file(tmp.path().join("SHUTDOWN")).unwrap();
    tmp
}

fn bench_recover(c: &mut Criterion) {
    let mut group = c.benchmark_group("recover");
    group.sample_size(20);

    group.bench_function("rescan_10k_records", |b| {
        b.iter_batched(
            || populated_dir(10_000),
            |tmp| {
                let manager =
                    LogfileManager::new(bench_config(tmp.path()), Arc::new(DiscardConsumer))
                        .unwrap();
                manager.start().unwrap();
                std::hint::black_box(manager.last_assigned_tick());
                manager.stop().unwrap();
                drop(tmp);
            },
            BatchSize::PerIteration,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_recover);
criterion_main!(benches);
