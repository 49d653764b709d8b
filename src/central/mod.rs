//! Central role: finds sensors, authenticates and downloads their logs.
//!
//! ```text
//!  scan ─▶ machine::step ─▶ effects ─▶ BlePort / SmpClient / timers
//!                ▲
//!   LinkEvent ───┘   (stack callbacks, SMP completions, timer expiry)
//!
//!  SMP file chunk ─▶ auth (challenge) ─▶ download ─▶ pipeline ─▶ publish
//!                                                        └──▶ stash ─▶ drain
//! ```
//!
//! [`machine`] owns the connection lifecycle as a pure function; everything
//! with side effects sits behind the ports the service passes in.

pub mod auth;
pub mod download;
pub mod drain;
pub mod machine;
pub mod pipeline;
pub mod scan;
pub mod state;

pub use download::{ChunkOutcome, Downloader, EntrySink};
pub use drain::{DrainReset, DrainStep, StashDrain};
pub use machine::{Effect, LinkEvent, SmpProgress, Snapshot, Step, step};
pub use scan::{AdvReport, AdvType, IgnoreReason};
pub use state::{
    BtAddr, CentralStats, ConnHandle, InactivityWatchdog, LedIndication, SensorState,
};
