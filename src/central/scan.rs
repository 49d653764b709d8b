//! Advertisement parsing and the sensor scan filter.
//!
//! Contact tracing manufacturer data (26 bytes, little-endian):
//!
//! ```text
//!  0       2          4         6       8        14     15     16      20   21     22    23
//!  ┌───────┬──────────┬─────────┬───────┬────────┬──────┬──────┬───────┬────┬──────┬─────┬──────┐
//!  │company│ protocol │ network │ flags │ addr×6 │ rec  │ dev  │ epoch │ tx │motion│model│ rsvd │
//!  │ 0x0077│   id     │   id    │       │        │ type │ type │       │    │      │ id  │  ×3  │
//!  └───────┴──────────┴─────────┴───────┴────────┴──────┴──────┴───────┴────┴──────┴─────┴──────┘
//! ```

use super::state::BtAddr;
use crate::datalog::RecordType;

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_UUID128_ALL: u8 = 0x07;
/// AD type of manufacturer specific data.
pub const AD_TYPE_MANUFACTURER_DATA: u8 = 0xFF;

/// `BT_LE_AD_GENERAL | BT_LE_AD_NO_BREDR`.
pub const AD_FLAGS_GENERAL_NO_BREDR: u8 = 0x06;

pub const COMPANY_ID: u16 = 0x0077;
pub const PROTOCOL_ID_GATEWAY: u16 = 0xFF81;
pub const PROTOCOL_ID_TRACKER: u16 = 0xFF82;
pub const PROTOCOL_ID_DATA_DOWNLOAD: u16 = 0xFF83;

pub const FLAG_HAS_EPOCH_TIME: u16 = 0x0001;
pub const FLAG_HAS_LOG_DATA: u16 = 0x0002;

pub const CT_AD_SIZE: usize = 26;

/// Controller advertising PDU types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvType {
    Ind,
    DirectInd,
    ScanInd,
    NonConnInd,
    ScanRsp,
}

impl AdvType {
    pub fn is_connectable(self) -> bool {
        matches!(self, Self::Ind | Self::DirectInd)
    }
}

/// One scan result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvReport {
    pub addr: BtAddr,
    pub rssi: i8,
    pub adv_type: AdvType,
    /// Raw AD structures (`len, type, data…` repeated).
    pub data: Vec<u8>,
}

/// Why an advertisement did not lead to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    AlreadyConnected,
    CloudNotReady,
    StashPending,
    NotConnectable,
    NotContactTracing,
    InvalidRecordType,
    NoLogData,
}

impl IgnoreReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AlreadyConnected => "already connected",
            Self::CloudNotReady => "not connected to cloud",
            Self::StashPending => "send stash first",
            Self::NotConnectable => "not connectable",
            Self::NotContactTracing => "non-contact tracing",
            Self::InvalidRecordType => "invalid record type",
            Self::NoLogData => "log data not present",
        }
    }
}

/// Walk AD structures and return the payload of the first of `ad_type`.
pub fn find_ad(data: &[u8], ad_type: u8) -> Option<&[u8]> {
    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = usize::from(len);
        if len == 0 || len > tail.len() {
            return None;
        }
        let (field, next) = tail.split_at(len);
        if field[0] == ad_type {
            return Some(&field[1..]);
        }
        rest = next;
    }
    None
}

/// Decoded contact tracing manufacturer data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtAdvertisement {
    pub company_id: u16,
    pub protocol_id: u16,
    pub network_id: u16,
    pub flags: u16,
    pub addr: [u8; 6],
    pub record_type: u8,
    pub device_type: u8,
    pub epoch: u32,
    pub tx_power: i8,
    pub motion_magnitude: u8,
    pub model_id: u8,
}

impl CtAdvertisement {
    /// Parse manufacturer data; `None` unless the company id matches and the
    /// payload is long enough.
    pub fn parse(mfg: &[u8]) -> Option<Self> {
        let b: &[u8; CT_AD_SIZE] = mfg.get(..CT_AD_SIZE)?.try_into().ok()?;
        let u16_at = |i: usize| u16::from_le_bytes([b[i], b[i + 1]]);
        let ad = Self {
            company_id: u16_at(0),
            protocol_id: u16_at(2),
            network_id: u16_at(4),
            flags: u16_at(6),
            addr: [b[8], b[9], b[10], b[11], b[12], b[13]],
            record_type: b[14],
            device_type: b[15],
            epoch: u32::from_le_bytes([b[16], b[17], b[18], b[19]]),
            tx_power: b[20] as i8,
            motion_magnitude: b[21],
            model_id: b[22],
        };
        (ad.company_id == COMPANY_ID).then_some(ad)
    }

    pub fn to_bytes(&self) -> [u8; CT_AD_SIZE] {
        let mut b = [0u8; CT_AD_SIZE];
        b[0..2].copy_from_slice(&self.company_id.to_le_bytes());
        b[2..4].copy_from_slice(&self.protocol_id.to_le_bytes());
        b[4..6].copy_from_slice(&self.network_id.to_le_bytes());
        b[6..8].copy_from_slice(&self.flags.to_le_bytes());
        b[8..14].copy_from_slice(&self.addr);
        b[14] = self.record_type;
        b[15] = self.device_type;
        b[16..20].copy_from_slice(&self.epoch.to_le_bytes());
        b[20] = self.tx_power as u8;
        b[21] = self.motion_magnitude;
        b[22] = self.model_id;
        b
    }

    /// Tracker or data-download sensor advertisement.
    pub fn is_sensor(&self) -> bool {
        matches!(
            self.protocol_id,
            PROTOCOL_ID_TRACKER | PROTOCOL_ID_DATA_DOWNLOAD
        )
    }

    pub fn has_log_data(&self) -> bool {
        self.flags & FLAG_HAS_LOG_DATA != 0
    }
}

/// Gateway-side conditions the filter checks before looking at the payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScanGate {
    pub connected: bool,
    pub cloud_ready: bool,
    pub stash_pending: bool,
}

/// Outcome of filtering one report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanVerdict {
    /// Dropped before the record-type check.
    Ignore(IgnoreReason),
    /// Counted as a contact tracing ad but not worth a connection.
    Counted(IgnoreReason),
    /// Connect to this sensor.
    Connect,
}

/// Apply the scan filter in order: link, cloud, stash, PDU type, payload
/// signature, record type, log-data flag.
pub fn filter(gate: ScanGate, report: &AdvReport) -> ScanVerdict {
    if gate.connected {
        return ScanVerdict::Ignore(IgnoreReason::AlreadyConnected);
    }
    if !gate.cloud_ready {
        return ScanVerdict::Ignore(IgnoreReason::CloudNotReady);
    }
    if gate.stash_pending {
        return ScanVerdict::Ignore(IgnoreReason::StashPending);
    }
    if !report.adv_type.is_connectable() {
        return ScanVerdict::Ignore(IgnoreReason::NotConnectable);
    }
    let ad = find_ad(&report.data, AD_TYPE_MANUFACTURER_DATA)
        .and_then(CtAdvertisement::parse)
        .filter(CtAdvertisement::is_sensor);
    let Some(ad) = ad else {
        return ScanVerdict::Ignore(IgnoreReason::NotContactTracing);
    };
    if RecordType::from_u8(ad.record_type).is_none() {
        return ScanVerdict::Ignore(IgnoreReason::InvalidRecordType);
    }
    if !ad.has_log_data() {
        return ScanVerdict::Counted(IgnoreReason::NoLogData);
    }
    ScanVerdict::Connect
}
