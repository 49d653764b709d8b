//! Sensor log file format.
//!
//! A downloaded log file is a log header followed by entries. Entries
//! travel with a CRC16 trailer that is never part of the entry itself:
//!
//! ```text
//! ┌──────────────┬───────┐┌──────────────┬───────┐┌──────────────┬───────┐
//! │ LogHeader    │ CRC*  ││ entry 0      │ CRC16 ││ entry 1      │ CRC16 │ …
//! └──────────────┴───────┘└──────────────┴───────┘└──────────────┴───────┘
//!                * V2 only
//! ```
//!
//! | Version | Entry size                         | Header bytes |
//! |---------|------------------------------------|--------------|
//! | V1      | fixed, `entry_size` from header    | 43           |
//! | V2      | per entry, LE u16 at header[14..16] | 47 (+2 CRC)  |

pub mod cursor;
pub mod entry;
pub mod header;

pub use entry::{
    EntryHeader, Record, RecordType, V2Entries, V2Entry, record_bytes_in_entry, validate_v1_entry,
};
pub use header::{LocalInfo, LogHeader, PublishHeader};

pub const ENTRY_START_BYTE: u8 = 0xA5;
pub const ENTRY_FLAGS_UNSENT: u8 = 0xFF;
pub const ENTRY_FLAGS_SENT: u8 = 0x00;

pub const ENTRY_PROTOCOL_V1: u16 = 0x0001;
pub const ENTRY_PROTOCOL_V2: u16 = 0x0002;

pub const DEVICE_ID_SIZE: usize = 6;
pub const FW_VERSION_SIZE: usize = 4;

/// Bytes before the first record of an entry.
pub const ENTRY_HEADER_SIZE: usize = 16;
/// Offset of the LE size field (the header's reserved bytes) in a V2 entry.
pub const ENTRY_SIZE_OFFSET: usize = 14;
pub const MAX_ENTRY_SIZE: usize = 256;
pub const CRC_SIZE: usize = 2;

pub const LOG_HEADER_V1_SIZE: usize = 43;
pub const LOG_HEADER_V2_SIZE: usize = 47;

pub const PUBLISH_HEADER_SIZE: usize = 23;
/// Offset of `device_time` inside a serialized publish header.
pub const PUBLISH_DEVICE_TIME_OFFSET: usize = 8;

pub const RSSI_TRACKING_RECORD_SIZE: usize = 4;
pub const RSSI_TRACKING_TS_RECORD_SIZE: usize = 8;
