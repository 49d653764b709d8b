//! Fuzz target: log file parsing
//!
//! Treats the input as the start of a downloaded log: header first, then
//! entries of whichever version the header names. Parsing must never
//! panic or yield an entry outside the input.
//!
//! cargo fuzz run fuzz_log_chunk

#![no_main]

use ct_gateway::datalog::entry::{V2Entries, record_bytes_in_entry, validate_v1_entry};
use ct_gateway::datalog::{ENTRY_PROTOCOL_V2, LogHeader};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(header) = LogHeader::parse(data) else {
        return;
    };
    let body = &data[header.wire_size()..];

    if header.version == ENTRY_PROTOCOL_V2 {
        let mut walk = V2Entries::new(body);
        for entry in walk.by_ref().flatten() {
            assert!(entry.offset + entry.size() <= body.len());
            let _ = entry.record_count();
        }
        assert!(walk.consumed() <= body.len());
    } else {
        let size = usize::from(header.entry_size);
        if let Ok(entry) = validate_v1_entry(body, size) {
            let _ = record_bytes_in_entry(entry, 4);
        }
    }
});
