//! Log file header (V1/V2) and the publish header prepended to every
//! cloud payload.
//!
//! ```text
//! LogHeader            V1 (43 B)                 V2 (47 B + CRC16)
//!   0  version u16
//!   2  entry_size u16  (V1)  / max_entry_size (V2)
//!   4  entry_count u16
//!   6  device_id [6]
//!  12  device_time u32
//!  16  log_size u32
//!  20  last_upload_time u32
//!  24  local info      19 B (V1) / 23 B with up_time (V2)
//!
//! PublishHeader (23 B)
//!   0  version u16 │ 2 device_id [6] │ 8 device_time u32 │ 12 last_upload u32
//!  16  fw [4]      │ 20 battery u8   │ 21 network_id u16
//! ```

use super::cursor::{ByteReader, ByteWriter};
use super::{
    CRC_SIZE, DEVICE_ID_SIZE, ENTRY_PROTOCOL_V1, ENTRY_PROTOCOL_V2, FW_VERSION_SIZE,
    LOG_HEADER_V1_SIZE, LOG_HEADER_V2_SIZE, PUBLISH_DEVICE_TIME_OFFSET, PUBLISH_HEADER_SIZE,
};
use crate::crypto;
use crate::error::CodecError;

/// Sensor self-status block carried in the log header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalInfo {
    pub fw_version: [u8; FW_VERSION_SIZE],
    pub devices_seen: u16,
    pub network_id: u16,
    pub ad_interval_ms: u16,
    pub log_interval_min: u16,
    pub scan_interval_sec: u16,
    pub battery_level: u8,
    pub scan_duration_sec: u8,
    pub profile: u8,
    pub rssi_threshold: i8,
    pub tx_power: i8,
    /// Present in V2 headers only.
    pub up_time_sec: Option<u32>,
}

/// First structure of every downloaded log file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogHeader {
    pub version: u16,
    /// V1: fixed entry size. V2: maximum entry size.
    pub entry_size: u16,
    pub entry_count: u16,
    pub device_id: [u8; DEVICE_ID_SIZE],
    pub device_time: u32,
    pub log_size: u32,
    pub last_upload_time: u32,
    pub local: LocalInfo,
}

impl LogHeader {
    /// Read only the protocol version (first two bytes, LE).
    pub fn peek_version(buf: &[u8]) -> Result<u16, CodecError> {
        ByteReader::new(buf).u16_le()
    }

    /// Parse a header of either version.
    ///
    /// V2 headers are followed by a CRC16 over the 47 header bytes; a
    /// mismatch is [`CodecError::CrcMismatch`].
    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let version = Self::peek_version(buf)?;
        match version {
            ENTRY_PROTOCOL_V1 => {
                let bytes = buf.get(..LOG_HEADER_V1_SIZE).ok_or(CodecError::Truncated)?;
                Self::read_fields(bytes, false)
            }
            ENTRY_PROTOCOL_V2 => {
                let bytes = buf.get(..LOG_HEADER_V2_SIZE).ok_or(CodecError::Truncated)?;
                let trailer = buf
                    .get(LOG_HEADER_V2_SIZE..LOG_HEADER_V2_SIZE + CRC_SIZE)
                    .ok_or(CodecError::Truncated)?;
                crypto::verify_crc_trailer(bytes, [trailer[0], trailer[1]]).map_err(
                    |(received, computed)| CodecError::CrcMismatch { received, computed },
                )?;
                Self::read_fields(bytes, true)
            }
            other => Err(CodecError::UnsupportedVersion(other)),
        }
    }

    fn read_fields(bytes: &[u8], v2: bool) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(bytes);
        Ok(Self {
            version: r.u16_le()?,
            entry_size: r.u16_le()?,
            entry_count: r.u16_le()?,
            device_id: r.array()?,
            device_time: r.u32_le()?,
            log_size: r.u32_le()?,
            last_upload_time: r.u32_le()?,
            local: LocalInfo {
                fw_version: r.array()?,
                devices_seen: r.u16_le()?,
                network_id: r.u16_le()?,
                ad_interval_ms: r.u16_le()?,
                log_interval_min: r.u16_le()?,
                scan_interval_sec: r.u16_le()?,
                battery_level: r.u8()?,
                scan_duration_sec: r.u8()?,
                profile: r.u8()?,
                rssi_threshold: r.i8()?,
                tx_power: r.i8()?,
                up_time_sec: if v2 { Some(r.u32_le()?) } else { None },
            },
        })
    }

    /// Size on the wire, including the V2 CRC trailer.
    pub fn wire_size(&self) -> usize {
        if self.version == ENTRY_PROTOCOL_V2 {
            LOG_HEADER_V2_SIZE + CRC_SIZE
        } else {
            LOG_HEADER_V1_SIZE
        }
    }

    /// Serialize as a sensor would. V2 output carries its CRC trailer.
    pub fn encode(&self, out: &mut [u8]) -> Result<usize, CodecError> {
        let v2 = self.version == ENTRY_PROTOCOL_V2;
        let mut w = ByteWriter::new(out);
        w.u16_le(self.version)?;
        w.u16_le(self.entry_size)?;
        w.u16_le(self.entry_count)?;
        w.put(&self.device_id)?;
        w.u32_le(self.device_time)?;
        w.u32_le(self.log_size)?;
        w.u32_le(self.last_upload_time)?;
        let l = &self.local;
        w.put(&l.fw_version)?;
        w.u16_le(l.devices_seen)?;
        w.u16_le(l.network_id)?;
        w.u16_le(l.ad_interval_ms)?;
        w.u16_le(l.log_interval_min)?;
        w.u16_le(l.scan_interval_sec)?;
        w.u8(l.battery_level)?;
        w.u8(l.scan_duration_sec)?;
        w.u8(l.profile)?;
        w.i8(l.rssi_threshold)?;
        w.i8(l.tx_power)?;
        if v2 {
            w.u32_le(l.up_time_sec.unwrap_or(0))?;
        }
        let body_len = w.len();
        if v2 {
            let crc = crypto::crc16_ccitt(&out[..body_len]).to_le_bytes();
            let tail = out
                .get_mut(body_len..body_len + CRC_SIZE)
                .ok_or(CodecError::Truncated)?;
            tail.copy_from_slice(&crc);
            return Ok(body_len + CRC_SIZE);
        }
        Ok(body_len)
    }
}

/// Envelope prepended to every payload published or stashed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishHeader {
    pub version: u16,
    pub device_id: [u8; DEVICE_ID_SIZE],
    /// Gateway epoch at publish time, never sensor time.
    pub device_time: u32,
    pub last_upload_time: u32,
    pub fw_version: [u8; FW_VERSION_SIZE],
    pub battery_level: u8,
    pub network_id: u16,
}

impl PublishHeader {
    /// Build from the active download's log header. V1 headers carry no
    /// status fields worth forwarding, so those stay zero.
    pub fn from_log_header(log: &LogHeader, epoch: u32) -> Self {
        let mut hdr = Self {
            version: log.version,
            device_id: log.device_id,
            device_time: epoch,
            last_upload_time: log.last_upload_time,
            ..Self::default()
        };
        if log.version == ENTRY_PROTOCOL_V2 {
            hdr.fw_version = log.local.fw_version;
            hdr.battery_level = log.local.battery_level;
            hdr.network_id = log.local.network_id;
        }
        hdr
    }

    pub fn to_bytes(&self) -> [u8; PUBLISH_HEADER_SIZE] {
        let mut out = [0u8; PUBLISH_HEADER_SIZE];
        out[0..2].copy_from_slice(&self.version.to_le_bytes());
        out[2..8].copy_from_slice(&self.device_id);
        out[8..12].copy_from_slice(&self.device_time.to_le_bytes());
        out[12..16].copy_from_slice(&self.last_upload_time.to_le_bytes());
        out[16..20].copy_from_slice(&self.fw_version);
        out[20] = self.battery_level;
        out[21..23].copy_from_slice(&self.network_id.to_le_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, CodecError> {
        let mut r = ByteReader::new(buf);
        Ok(Self {
            version: r.u16_le()?,
            device_id: r.array()?,
            device_time: r.u32_le()?,
            last_upload_time: r.u32_le()?,
            fw_version: r.array()?,
            battery_level: r.u8()?,
            network_id: r.u16_le()?,
        })
    }

    /// Overwrite `device_time` in an already serialized header.
    pub fn stamp_device_time(buf: &mut [u8], epoch: u32) -> Result<(), CodecError> {
        buf.get_mut(PUBLISH_DEVICE_TIME_OFFSET..PUBLISH_DEVICE_TIME_OFFSET + 4)
            .ok_or(CodecError::Truncated)?
            .copy_from_slice(&epoch.to_le_bytes());
        Ok(())
    }
}
