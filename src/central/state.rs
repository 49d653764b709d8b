//! Central-role state, counters and link primitives.

use core::fmt;

/// Stack handle of one BLE connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle(pub u16);

/// LE device address (little-endian bytes as the controller reports them).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BtAddr {
    pub bytes: [u8; 6],
    pub random: bool,
}

impl BtAddr {
    pub const fn public(bytes: [u8; 6]) -> Self {
        Self {
            bytes,
            random: false,
        }
    }
}

impl fmt::Display for BtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ({})",
            b[5],
            b[4],
            b[3],
            b[2],
            b[1],
            b[0],
            if self.random { "random" } else { "public" }
        )
    }
}

/// Where the sensor link is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorState {
    /// Scanning for a sensor that has log data.
    #[default]
    FindingDevice,
    /// Connected; MTU exchange and service discovery.
    FindingService,
    FindingSmpChar,
    EnablingNotifications,
    /// Subscribed; the first SMP command is being sent.
    ConnectedAndConfigured,
    /// Challenge read outstanding.
    ChallengeReq,
    /// Encrypted challenge written, waiting for the verdict.
    ChallengeRsp,
    LogDownload,
}

impl SensorState {
    /// Between connect and disconnect.
    pub fn is_connected(self) -> bool {
        self != Self::FindingDevice
    }
}

/// What the Bluetooth LED should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedIndication {
    /// Slow blink: scanning, advertising non-connectable.
    Searching,
    /// Fast blink: connectable advertising window open.
    SearchingConnectable,
    /// Solid: sensor link configured.
    Connected,
}

/// Counters exposed on the status surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CentralStats {
    /// Every advertisement seen.
    pub all_ads: u32,
    /// Contact tracing advertisements with a valid record type.
    pub ct_ads: u32,
    pub connections: u32,
    pub download_starts: u32,
    pub download_completions: u32,
}

/// Link activity check run every `tick_secs`.
///
/// A transfer sets the activity flag; a tick with a connected sensor and
/// no activity accumulates silence until `timeout_secs` is reached.
#[derive(Debug, Clone)]
pub struct InactivityWatchdog {
    tick_secs: u32,
    timeout_secs: u32,
    silent_secs: u32,
    active: bool,
}

impl InactivityWatchdog {
    pub fn new(tick_secs: u32, timeout_secs: u32) -> Self {
        Self {
            tick_secs,
            timeout_secs,
            silent_secs: 0,
            active: false,
        }
    }

    pub fn mark_active(&mut self) {
        self.active = true;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Returns `true` when the sensor should be disconnected.
    pub fn tick(&mut self, connected: bool) -> bool {
        let quiet = connected && !self.active;
        self.active = false;
        if !quiet {
            self.silent_secs = 0;
            return false;
        }
        self.silent_secs += self.tick_secs;
        if self.silent_secs >= self.timeout_secs {
            self.silent_secs = 0;
            return true;
        }
        false
    }
}
