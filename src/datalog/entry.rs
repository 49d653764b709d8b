//! Log entries and their records.
//!
//! ```text
//! Entry header (16 B)
//!   0 start 0xA5 │ 1 flags │ 2 scan_interval u16 │ 4 serial [6]
//!  10 timestamp u32 │ 14 reserved [2]  (V2: entry size, LE)
//! Records from byte 16, tagged by their first byte:
//!   0x10 rssi_tracking       type rssi motion tx_power               (4 B)
//!   0x11 rssi_tracking_w_ts  type status rsvd offset:u16 rssi motion tx (8 B)
//!   0xFF pad (V1 end of records)
//! ```

use super::cursor::{ByteReader, ByteWriter};
use super::{
    CRC_SIZE, DEVICE_ID_SIZE, ENTRY_HEADER_SIZE, ENTRY_SIZE_OFFSET, ENTRY_START_BYTE,
    RSSI_TRACKING_RECORD_SIZE, RSSI_TRACKING_TS_RECORD_SIZE,
};
use crate::crypto;
use crate::error::CodecError;

/// Record type tags shared by advertisements and log entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    V00 = 0x00,
    /// rssi_tracking
    V10 = 0x10,
    /// rssi_tracking_w_ts
    V11 = 0x11,
}

impl RecordType {
    pub const fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::V00),
            0x10 => Some(Self::V10),
            0x11 => Some(Self::V11),
            _ => None,
        }
    }
}

/// Fixed 16-byte prefix of every entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryHeader {
    pub start: u8,
    pub flags: u8,
    pub scan_interval: u16,
    pub serial: [u8; DEVICE_ID_SIZE],
    pub timestamp: u32,
    pub reserved: [u8; 2],
}

impl EntryHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(buf);
        let hdr = Self {
            start: r.u8()?,
            flags: r.u8()?,
            scan_interval: r.u16_le()?,
            serial: r.array()?,
            timestamp: r.u32_le()?,
            reserved: r.array()?,
        };
        if hdr.start != ENTRY_START_BYTE {
            return Err(CodecError::BadStartByte(hdr.start));
        }
        Ok(hdr)
    }

    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let mut w = ByteWriter::new(out);
        w.u8(self.start)?;
        w.u8(self.flags)?;
        w.u16_le(self.scan_interval)?;
        w.put(&self.serial)?;
        w.u32_le(self.timestamp)?;
        w.put(&self.reserved)?;
        Ok(w.len())
    }
}

/// One decoded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
    RssiTracking {
        rssi: i8,
        motion: u8,
        tx_power: i8,
    },
    RssiTrackingWithTs {
        status: u8,
        scan_interval_offset: u16,
        rssi: i8,
        motion: u8,
        tx_power: i8,
    },
    /// Unrecognised tag; skipped as a 4-byte record and not counted.
    Unknown(u8),
}

impl Record {
    pub fn is_counted(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }
}

/// Walks the records of one entry (bytes after the 16-byte header).
pub struct Records<'a> {
    buf: &'a [u8],
    idx: usize,
}

impl<'a> Records<'a> {
    pub fn new(entry: &'a [u8]) -> Self {
        Self {
            buf: entry.get(ENTRY_HEADER_SIZE..).unwrap_or(&[]),
            idx: 0,
        }
    }
}

impl Iterator for Records<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let tag = *self.buf.get(self.idx)?;
        let (record, size) = match RecordType::from_u8(tag) {
            Some(RecordType::V10) => {
                let raw = self.buf.get(self.idx..self.idx + RSSI_TRACKING_RECORD_SIZE)?;
                (
                    Record::RssiTracking {
                        rssi: raw[1] as i8,
                        motion: raw[2],
                        tx_power: raw[3] as i8,
                    },
                    RSSI_TRACKING_RECORD_SIZE,
                )
            }
            Some(RecordType::V11) => {
                let raw = self
                    .buf
                    .get(self.idx..self.idx + RSSI_TRACKING_TS_RECORD_SIZE)?;
                (
                    Record::RssiTrackingWithTs {
                        status: raw[1],
                        scan_interval_offset: u16::from_le_bytes([raw[3], raw[4]]),
                        rssi: raw[5] as i8,
                        motion: raw[6],
                        tx_power: raw[7] as i8,
                    },
                    RSSI_TRACKING_TS_RECORD_SIZE,
                )
            }
            _ => (Record::Unknown(tag), RSSI_TRACKING_RECORD_SIZE),
        };
        self.idx += size;
        Some(record)
    }
}

/// Bytes of record data in a V1 entry before the first record whose tag is
/// `0xFF`; the whole payload when no such record exists.
///
/// `None` when the entry cannot hold a header plus one record.
pub fn record_bytes_in_entry(entry: &[u8], record_size: usize) -> Option<usize> {
    if record_size == 0 || entry.len() < ENTRY_HEADER_SIZE + record_size {
        return None;
    }
    let payload = &entry[ENTRY_HEADER_SIZE..];
    let used = (0..payload.len())
        .step_by(record_size)
        .find(|&i| payload[i] == 0xFF)
        .unwrap_or(payload.len());
    Some(used)
}

/// Validate a fixed-size V1 entry at the front of `buf` and return its
/// `entry_size` bytes (CRC excluded).
pub fn validate_v1_entry(buf: &[u8], entry_size: usize) -> Result<&[u8], CodecError> {
    let body = buf.get(..entry_size).ok_or(CodecError::Truncated)?;
    let trailer = buf
        .get(entry_size..entry_size + CRC_SIZE)
        .ok_or(CodecError::Truncated)?;
    crypto::verify_crc_trailer(body, [trailer[0], trailer[1]])
        .map_err(|(received, computed)| CodecError::CrcMismatch { received, computed })?;
    Ok(body)
}

/// One CRC-verified V2 entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct V2Entry<'a> {
    /// Offset of the entry in the scanned buffer.
    pub offset: usize,
    /// Entry bytes, CRC excluded.
    pub bytes: &'a [u8],
}

impl<'a> V2Entry<'a> {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn header(&self) -> Result<EntryHeader, CodecError> {
        EntryHeader::parse(self.bytes)
    }

    pub fn records(&self) -> Records<'a> {
        Records::new(self.bytes)
    }

    pub fn record_count(&self) -> usize {
        self.records().filter(Record::is_counted).count()
    }
}

/// Iterates V2 entries packed back to back with CRC trailers.
///
/// Ends quietly at a byte that is not the start byte (padding) or when the
/// next entry is not fully present. A CRC mismatch is yielded once as an
/// error and ends the walk, since later offsets can no longer be trusted.
pub struct V2Entries<'a> {
    buf: &'a [u8],
    offset: usize,
    done: bool,
}

impl<'a> V2Entries<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            done: false,
        }
    }

    /// Bytes consumed by the entries yielded so far.
    pub fn consumed(&self) -> usize {
        self.offset
    }
}

impl<'a> Iterator for V2Entries<'a> {
    type Item = Result<V2Entry<'a>, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let start = self.offset;
        let rest = &self.buf[start..];
        if rest.first() != Some(&ENTRY_START_BYTE) || rest.len() < ENTRY_HEADER_SIZE {
            self.done = true;
            return None;
        }
        let size = usize::from(u16::from_le_bytes([
            rest[ENTRY_SIZE_OFFSET],
            rest[ENTRY_SIZE_OFFSET + 1],
        ]));
        if size + CRC_SIZE > rest.len() {
            self.done = true;
            return None;
        }

        let bytes = &rest[..size];
        if let Err((received, computed)) =
            crypto::verify_crc_trailer(bytes, [rest[size], rest[size + 1]])
        {
            self.done = true;
            return Some(Err(CodecError::CrcMismatch { received, computed }));
        }

        self.offset += size + CRC_SIZE;
        Some(Ok(V2Entry { offset: start, bytes }))
    }
}

/// Serialize an entry followed by its CRC trailer (the sensor side of the
/// format). For V2 the size is written into the reserved bytes first.
pub fn encode_entry(header: &EntryHeader, records: &[u8], v2: bool) -> Vec<u8> {
    let size = ENTRY_HEADER_SIZE + records.len();
    let mut out = vec![0u8; size + CRC_SIZE];
    let mut hdr = *header;
    if v2 {
        hdr.reserved = (size as u16).to_le_bytes();
    }
    // Both writes are sized exactly above.
    let _ = hdr.encode(&mut out[..ENTRY_HEADER_SIZE]);
    out[ENTRY_HEADER_SIZE..size].copy_from_slice(records);
    let crc = crypto::crc16_ccitt(&out[..size]).to_le_bytes();
    out[size..].copy_from_slice(&crc);
    out
}
