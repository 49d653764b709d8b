//! Fuzz target: settings upload from a central
//!
//! Runs an arbitrary request frame through the NV intercept: decode,
//! map to a setting, build the reply. No input may panic, and every
//! decodable request must produce a reply frame.
//!
//! cargo fuzz run fuzz_nv_upload

#![no_main]

use ct_gateway::peripheral::intercept;
use ct_gateway::smp::MgmtErr;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok((req, upload)) = intercept::decode_request(data) else {
        return;
    };
    let rc = match intercept::map_upload(&upload, 512) {
        Ok(_) => MgmtErr::EOk,
        Err(rc) => rc,
    };
    let off = upload.data.len() as u32;
    assert!(intercept::response_frame(&req, rc, off).is_ok());
});
