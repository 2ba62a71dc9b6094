#![no_main]

use libfuzzer_sys::fuzz_target;
use memvis::extractor::parse_line;

fuzz_target!(|data: &[u8]| {
    // Trace lines are decoded lossily by the extractor, so do the same here
    let line = String::from_utf8_lossy(data);
    let _ = parse_line(&line);
});
