//! Log file download: turns file-read responses into validated entries.
//!
//! ```text
//!  chunk 0:   [ LogHeader (+CRC for V2) ]              → header only
//!  chunk n:   V1  [ entry | CRC ][ entry | CRC ]…       fixed size, may
//!                                                       straddle chunks
//!             V2  [ entry | CRC ][ entry | CRC ]…       sized per entry,
//!                                                       whole per chunk
//! ```
//!
//! A V1 entry whose CRC fails is dropped and the rest of that chunk is
//! held back until the next response arrives; the final response flushes
//! whatever is still held. A V2 entry whose CRC fails aborts the download,
//! since later offsets can no longer be trusted.

use log::{debug, info, warn};

use crate::crypto::{self, AesKey};
use crate::datalog::{
    CRC_SIZE, ENTRY_HEADER_SIZE, ENTRY_PROTOCOL_V1, LogHeader, RSSI_TRACKING_RECORD_SIZE,
    V2Entries, record_bytes_in_entry, validate_v1_entry,
};
use crate::error::CodecError;
use crate::smp::{FileResponse, MgmtErr};

/// Receives every entry that passed validation.
pub trait EntrySink {
    /// `entry` excludes the CRC trailer.
    fn on_entry(&mut self, log: &LogHeader, entry: &[u8]);
}

/// What one processed response means for the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOutcome {
    /// Offset for the next read.
    pub next_off: u32,
    /// This response carried the log header.
    pub started: bool,
    /// The whole file has been received.
    pub complete: bool,
}

/// Per-download context, reset before each new file transfer.
#[derive(Debug)]
pub struct Downloader {
    file_size: u32,
    downloaded: u32,
    log_header: Option<LogHeader>,
    /// V1 bytes not yet forming a whole entry plus CRC.
    pending: Vec<u8>,
    pending_cap: usize,
    ent_cnt: u32,
    rec_cnt: u32,
    publish_entries: bool,
}

impl Downloader {
    /// `pending_cap` bounds the V1 carry-over (the log download buffer).
    pub fn new(pending_cap: usize, publish_entries: bool) -> Self {
        Self {
            file_size: 0,
            downloaded: 0,
            log_header: None,
            pending: Vec::with_capacity(pending_cap),
            pending_cap,
            ent_cnt: 0,
            rec_cnt: 0,
            publish_entries,
        }
    }

    pub fn reset(&mut self) {
        self.file_size = 0;
        self.downloaded = 0;
        self.log_header = None;
        self.pending.clear();
        self.ent_cnt = 0;
        self.rec_cnt = 0;
    }

    pub fn file_size(&self) -> u32 {
        self.file_size
    }

    pub fn downloaded(&self) -> u32 {
        self.downloaded
    }

    pub fn log_header(&self) -> Option<&LogHeader> {
        self.log_header.as_ref()
    }

    /// Valid entries seen in this download.
    pub fn entry_count(&self) -> u32 {
        self.ent_cnt
    }

    pub fn record_count(&self) -> u32 {
        self.rec_cnt
    }

    /// Process one complete file-read response.
    ///
    /// `key` is set when the link is encrypted. Any `Err` aborts the
    /// transfer with that result code.
    pub fn process(
        &mut self,
        rsp: &FileResponse,
        key: Option<&AesKey>,
        sink: &mut impl EntrySink,
    ) -> Result<ChunkOutcome, MgmtErr> {
        if rsp.rc != 0 {
            warn!("CT: download rc {}", rsp.rc);
            return Err(MgmtErr::from_code(rsp.rc));
        }
        let decrypted;
        let data: &[u8] = match key {
            Some(key) => {
                let mut out = vec![0u8; rsp.data.len()];
                let n = crypto::decrypt_cbc(key, &rsp.data, &mut out).map_err(|e| {
                    warn!("CT: chunk decrypt failed: {}", e);
                    MgmtErr::EInval
                })?;
                out.truncate(n);
                decrypted = out;
                &decrypted
            }
            None => &rsp.data,
        };

        let started = self.downloaded == 0;
        if started {
            self.start(rsp.len, data)?;
        } else {
            let Some(log) = self.log_header else {
                return Err(MgmtErr::EBadState);
            };
            match log.version {
                ENTRY_PROTOCOL_V1 => self.parse_v1(&log, data, sink),
                _ => self.parse_v2(&log, data, sink)?,
            }
        }

        self.downloaded += data.len() as u32;
        let complete = self.downloaded >= self.file_size;
        if complete {
            if let Some(log) = self.log_header.filter(|l| l.version == ENTRY_PROTOCOL_V1) {
                self.take_v1_entries(&log, sink, false);
            }
            info!(
                "CT: log download complete ({} bytes, {} entries, {} records)",
                self.downloaded, self.ent_cnt, self.rec_cnt
            );
            if !self.pending.is_empty() {
                warn!("CT: {} trailing bytes left unparsed", self.pending.len());
                self.pending.clear();
            }
        }
        Ok(ChunkOutcome {
            next_off: self.downloaded,
            started,
            complete,
        })
    }

    fn start(&mut self, len: Option<u32>, data: &[u8]) -> Result<(), MgmtErr> {
        let Some(len) = len else {
            warn!("CT: first chunk without file length");
            return Err(MgmtErr::EInval);
        };
        if len as usize == data.len() {
            debug!("CT: no entries, disconnecting");
            return Err(MgmtErr::ENoEnt);
        }
        self.file_size = len;
        self.ent_cnt = 0;
        self.rec_cnt = 0;
        self.pending.clear();

        let log = LogHeader::parse(data).map_err(|e| {
            match e {
                CodecError::CrcMismatch { .. } => warn!("CT: CRC mismatch in log header"),
                CodecError::UnsupportedVersion(v) => {
                    warn!("CT: unsupported entry protocol version {:04X}", v)
                }
                other => warn!("CT: bad log header: {}", other),
            }
            MgmtErr::ENoEnt
        })?;
        if log.version == ENTRY_PROTOCOL_V1
            && usize::from(log.entry_size) < ENTRY_HEADER_SIZE + RSSI_TRACKING_RECORD_SIZE
        {
            warn!("CT: V1 entry size {} too small", log.entry_size);
            return Err(MgmtErr::ENoEnt);
        }
        info!(
            "CT: log download (V{}, {} bytes, entry size {})",
            log.version, len, log.entry_size
        );
        self.log_header = Some(log);
        Ok(())
    }

    fn parse_v1(&mut self, log: &LogHeader, data: &[u8], sink: &mut impl EntrySink) {
        if self.pending.len() + data.len() > self.pending_cap {
            warn!("CT: V1 carry-over overflow, chunk dropped");
            return;
        }
        self.pending.extend_from_slice(data);
        self.take_v1_entries(log, sink, true);
    }

    /// Consume every whole entry in `pending`. With `hold_after_error` the
    /// walk stops at the first corrupt entry.
    fn take_v1_entries(
        &mut self,
        log: &LogHeader,
        sink: &mut impl EntrySink,
        hold_after_error: bool,
    ) {
        let entry_size = usize::from(log.entry_size);
        let mut used = 0;
        while self.pending.len() - used >= entry_size + CRC_SIZE {
            let buf = &self.pending[used..];
            match validate_v1_entry(buf, entry_size) {
                Ok(entry) => {
                    self.ent_cnt += 1;
                    used += entry_size + CRC_SIZE;
                    match record_bytes_in_entry(entry, RSSI_TRACKING_RECORD_SIZE) {
                        Some(n) if n > 0 => {
                            self.rec_cnt += (n / RSSI_TRACKING_RECORD_SIZE) as u32;
                            if self.publish_entries {
                                sink.on_entry(log, &entry[..ENTRY_HEADER_SIZE + n]);
                            }
                        }
                        _ => debug!("CT: V1 entry without records"),
                    }
                }
                Err(e) => {
                    warn!("CT: V1 entry dropped: {}", e);
                    used += entry_size + CRC_SIZE;
                    if hold_after_error {
                        break;
                    }
                }
            }
        }
        self.pending.drain(..used);
    }

    fn parse_v2(
        &mut self,
        log: &LogHeader,
        data: &[u8],
        sink: &mut impl EntrySink,
    ) -> Result<(), MgmtErr> {
        let mut entries = V2Entries::new(data);
        for item in entries.by_ref() {
            let entry = item.map_err(|e| {
                warn!("CT: V2 entry rejected: {}", e);
                MgmtErr::ENoEnt
            })?;
            self.ent_cnt += 1;
            self.rec_cnt += entry.record_count() as u32;
            if self.publish_entries {
                sink.on_entry(log, entry.bytes);
            }
        }
        if entries.consumed() < data.len() {
            debug!(
                "CT: {} padding bytes after V2 entries",
                data.len() - entries.consumed()
            );
        }
        Ok(())
    }
}
