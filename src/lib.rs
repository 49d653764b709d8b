//! Contact-tracing BLE gateway firmware library.
//!
//! Finds contact-tracing sensors over BLE, authenticates and downloads
//! their logs through SMP, and forwards every entry to the cloud, parking
//! whatever cannot be published in a bounded stash until the cloud is back.
//!
//! All ESP-IDF-specific code is guarded by `#[cfg(target_os = "espidf")]`
//! within each module; everything else runs on the host for tests.

#![deny(unused_must_use)]

pub mod app;
pub mod central;
pub mod config;
pub mod crypto;
pub mod datalog;
pub mod error;
pub mod peripheral;
pub mod publish;
pub mod smp;
pub mod stash;
pub mod timers;

pub mod adapters;
pub mod drivers;
pub mod pins;
