//! Fuzz target: `SmpClient::on_notify`
//!
//! Splits the input into notify fragments and feeds them to a client with
//! a download in flight. The client must never panic and must end idle
//! once it reports a completed response.
//!
//! cargo fuzz run fuzz_smp_response

#![no_main]

use ct_gateway::error::BleError;
use ct_gateway::smp::{NotifyOutcome, SmpClient, SmpTransport};
use libfuzzer_sys::fuzz_target;

struct Sink;

impl SmpTransport for Sink {
    fn smp_mtu(&self) -> Option<usize> {
        Some(247)
    }

    fn smp_write(&mut self, _frame: &[u8]) -> Result<(), BleError> {
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let Some((&split, rest)) = data.split_first() else {
        return;
    };
    let mut client = SmpClient::new(512, 256);
    if client.send_download(&mut Sink, 0).is_err() {
        return;
    }

    let step = usize::from(split).max(1);
    for fragment in rest.chunks(step) {
        match client.on_notify(Some(fragment)) {
            NotifyOutcome::Complete(..) => {
                assert!(!client.is_busy(), "client must be idle after a response");
                break;
            }
            NotifyOutcome::InProgress => assert!(client.is_busy()),
            _ => {}
        }
    }
});
