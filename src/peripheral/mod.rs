//! Peripheral role: what the gateway advertises and what a connected
//! central (phone app) may configure over SMP.

pub mod advertising;
pub mod intercept;

pub use advertising::{AdvMode, Advertiser};
pub use intercept::NvWrite;
