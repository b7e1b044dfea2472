#![no_main]

use journal::marker::parse_marker;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Some(view) = parse_marker(data) {
        // A valid parse must stay within bounds and re-validate.
        assert!(view.size as usize <= data.len());
        assert!(parse_marker(&data[..view.size as usize]).is_some());
    }
});
