//! Application core: the gateway's domain logic behind port traits.
//!
//! [`service::GatewayService`] wires the central state machine, the
//! download pipeline, the stash drain and the peripheral role together.
//! All interaction with the BLE stack, storage, clock and cloud happens
//! through the traits in [`ports`], so the whole core runs on the host
//! against mocks.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
