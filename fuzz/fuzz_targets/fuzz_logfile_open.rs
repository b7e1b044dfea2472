#![no_main]

use journal::logfile::Logfile;
use libfuzzer_sys::fuzz_target;
use std::io::Write;

fuzz_target!(|data: &[u8]| {
    // Opening a logfile full of arbitrary bytes must never panic: it either
    // rebuilds a cursor at the last valid marker or reports corruption.
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logfile-1.db");
    {
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(data).unwrap();
    }
    let _ = Logfile::open(&path, 1);
});
