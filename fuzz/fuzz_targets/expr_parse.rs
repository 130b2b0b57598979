#![no_main]

use libfuzzer_sys::fuzz_target;

const MAX_SOURCE_BYTES: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let capped = &data[..data.len().min(MAX_SOURCE_BYTES)];
    let source = String::from_utf8_lossy(capped);
    // Parsing must never panic or recurse unboundedly, whatever the input.
    let _ = clrsnap_expr::parse_expression(&source);
});
