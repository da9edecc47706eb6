#![no_main]
use libfuzzer_sys::fuzz_target;
use modhost::{classify, classify_bytes};
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    // Classification must never panic and must not depend on the reader
    let kind = classify_bytes(data);
    assert_eq!(kind, classify(&mut Cursor::new(data)));

    if data.len() > 64 {
        let _ = classify_bytes(&data[..data.len() / 2]);
    }
});
