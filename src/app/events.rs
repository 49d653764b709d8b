//! Inbound and outbound gateway events.
//!
//! Adapters translate BLE stack callbacks into [`GatewayEvent`]s and queue
//! them for the [`GatewayService`](super::service::GatewayService). The
//! service emits [`CtEvent`]s through the
//! [`EventSink`](super::ports::EventSink) port.

use crate::central::{BtAddr, ConnHandle, IgnoreReason, LinkEvent, SensorState};
use crate::central::drain::DrainReset;
use crate::peripheral::AdvMode;

use super::commands::GatewayCommand;

/// Everything that reaches the service from outside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Scan result, connection or discovery callback on the sensor side,
    /// or a connection change of a central.
    Ble(LinkEvent),
    /// SMP notification from the sensor; `None` when notifications were
    /// disabled by the stack.
    SmpNotify(Option<Vec<u8>>),
    /// SMP request frame written by a connected central.
    SmpRequest { conn: ConnHandle, frame: Vec<u8> },
    Command(GatewayCommand),
}

/// Structured events emitted by the gateway core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CtEvent {
    Started {
        network_id: u16,
        commissioned: bool,
    },
    StateChanged {
        from: SensorState,
        to: SensorState,
    },
    /// Throttled: one per `adv_log_filter_cnt` advertisements.
    AdIgnored {
        reason: IgnoreReason,
        all_ads: u32,
    },
    SensorFound {
        addr: BtAddr,
    },
    DownloadStarted {
        version: u16,
        file_size: u32,
    },
    DownloadCompleted {
        entries: u32,
        records: u32,
    },
    EntryPublished {
        size: usize,
    },
    EntryStashed {
        size: usize,
        stash_len: usize,
    },
    /// No room in the stash; the entry is lost.
    EntryDiscarded {
        size: usize,
    },
    StashDrained,
    StashReset(DrainReset),
    CentralConnected(ConnHandle),
    CentralDisconnected(ConnHandle),
    AdvertisingChanged(AdvMode),
    NetworkIdChanged(u16),
    Rebooting {
        delay_ms: u32,
        reason: &'static str,
    },
}
