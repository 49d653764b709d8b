//! Optional challenge/response authentication with the sensor.
//!
//! ```text
//!  gateway                         sensor
//!     │ read /sys/challenge.bin ──────▶│
//!     │◀──────── challenge (≤64 B) ────│   (one or more chunks)
//!     │  AES-CBC(key, challenge)       │
//!     │ write /sys/challenge_rsp.bin ─▶│   IV ‖ ciphertext (80 B)
//!     │◀──────────────── rc ───────────│
//! ```
//!
//! A sensor without authentication answers the read with `EUNKNOWN` or an
//! empty first chunk; the link then downgrades to a clear download.

use log::{info, warn};

use super::machine::SmpProgress;
use crate::crypto::{self, AES_CBC_IV_SIZE, AesKey};
use crate::smp::{FileResponse, MgmtErr};

pub const CHALLENGE_SIZE: usize = 64;
pub const CHALLENGE_RSP_SIZE: usize = CHALLENGE_SIZE + AES_CBC_IV_SIZE;

#[derive(Debug)]
pub struct Challenge {
    buf: heapless::Vec<u8, CHALLENGE_SIZE>,
    file_size: usize,
    rsp: [u8; CHALLENGE_RSP_SIZE],
    rsp_len: usize,
}

impl Default for Challenge {
    fn default() -> Self {
        Self::new()
    }
}

impl Challenge {
    pub fn new() -> Self {
        Self {
            buf: heapless::Vec::new(),
            file_size: 0,
            rsp: [0; CHALLENGE_RSP_SIZE],
            rsp_len: 0,
        }
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.file_size = 0;
        self.rsp_len = 0;
    }

    /// Encrypted challenge to write back; empty until complete.
    pub fn response(&self) -> &[u8] {
        &self.rsp[..self.rsp_len]
    }

    /// Handle one challenge-read response.
    pub fn on_read(&mut self, rsp: &FileResponse, cloud_ready: bool, key: &AesKey) -> SmpProgress {
        if !cloud_ready {
            return SmpProgress::Failed(MgmtErr::ENoEnt);
        }
        match MgmtErr::from_code(rsp.rc) {
            MgmtErr::EOk => {}
            MgmtErr::EUnknown => {
                info!("CT: sensor does not support authentication");
                return SmpProgress::AuthSkipped;
            }
            rc => {
                warn!("CT: challenge read failed: {}", rc);
                return SmpProgress::Failed(rc);
            }
        }

        if self.buf.is_empty() {
            if rsp.data.is_empty() {
                info!("CT: no authentication data sent");
                return SmpProgress::AuthSkipped;
            }
            self.file_size = rsp.len.map_or(rsp.data.len(), |l| l as usize);
        }
        if self.buf.extend_from_slice(&rsp.data).is_err() || self.file_size > CHALLENGE_SIZE {
            warn!(
                "CT: challenge too large ({} of {} bytes)",
                self.buf.len() + rsp.data.len(),
                CHALLENGE_SIZE
            );
            return SmpProgress::Failed(MgmtErr::EMsgSize);
        }
        if self.buf.len() < self.file_size {
            return SmpProgress::ChallengeChunk {
                next_off: self.buf.len() as u32,
            };
        }

        match crypto::encrypt_cbc(key, &self.buf, &mut self.rsp) {
            Ok(n) => {
                self.rsp_len = n;
                SmpProgress::ChallengeReady
            }
            Err(e) => {
                warn!("CT: challenge encryption failed: {}", e);
                SmpProgress::Failed(MgmtErr::EInval)
            }
        }
    }

    /// Handle the sensor's verdict on the written response.
    pub fn on_write(&mut self, rsp: &FileResponse, cloud_ready: bool) -> SmpProgress {
        if !cloud_ready {
            return SmpProgress::Failed(MgmtErr::ENoEnt);
        }
        if rsp.rc != 0 {
            warn!("CT: authentication failed (rc {})", rsp.rc);
            return SmpProgress::Failed(MgmtErr::from_code(rsp.rc));
        }
        info!("CT: authenticated");
        SmpProgress::Authenticated
    }
}
