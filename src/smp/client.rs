//! SMP request/response client.
//!
//! Holds the single outstanding command and reassembles its response from
//! notify fragments, in the manner of a streaming length-prefixed frame
//! decoder:
//!
//! ```text
//!   send() ──▶ Idle ─▶ Pending{cmd, offset 0}
//!                           │ first fragment: total = hdr.len + 8
//!                           ▼
//!                      Pending{cmd, offset n} ── offset ≥ total ──▶ Complete
//! ```
//!
//! A completed frame is checked against the command that produced it and
//! its CBOR body decoded, so the central only ever sees typed responses.

use log::{debug, error, warn};

use super::cbor::{self, EchoResponse, FileResponse};
use super::header::{self, SMP_HEADER_SIZE, SmpHeader};
use super::{
    CHALLENGE_FILE, CHALLENGE_RSP_FILE, FS_MGMT_ID_FILE, LOG_FILE, MGMT_GROUP_ID_FS,
    MGMT_GROUP_ID_OS, MGMT_OP_READ, MGMT_OP_READ_RSP, MGMT_OP_WRITE, MGMT_OP_WRITE_RSP,
    OS_MGMT_ID_ECHO,
};
use crate::error::{BleError, ProtocolError, SmpError};

/// The GATT side the client writes through.
pub trait SmpTransport {
    /// Negotiated ATT MTU, `None` while no sensor link exists.
    fn smp_mtu(&self) -> Option<usize>;

    /// Write one request to the SMP characteristic.
    fn smp_write(&mut self, frame: &[u8]) -> Result<(), BleError>;
}

/// Commands the central issues; each has exactly one response shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Read `/sys/challenge.bin`.
    ChallengeRead,
    /// Write the encrypted challenge to `/sys/challenge_rsp.bin`.
    ChallengeWrite,
    /// Read `/log/ct` from an offset.
    FileDownload,
    /// OS echo (link test).
    Echo,
}

impl Command {
    /// `(op, group, id)` a response to this command must carry.
    const fn expected(self) -> (u8, u16, u8) {
        match self {
            Self::ChallengeRead | Self::FileDownload => {
                (MGMT_OP_READ_RSP, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE)
            }
            Self::ChallengeWrite => (MGMT_OP_WRITE_RSP, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE),
            Self::Echo => (MGMT_OP_WRITE_RSP, MGMT_GROUP_ID_OS, OS_MGMT_ID_ECHO),
        }
    }
}

/// Typed body of a completed response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    File(FileResponse),
    Echo(EchoResponse),
}

/// Result of feeding one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// More fragments expected.
    InProgress,
    /// The response is complete (or was aborted); the client is idle again.
    Complete(Command, Result<Response, SmpError>),
    /// Notification arrived with nothing pending.
    Unsolicited,
    /// The stack reported notifications disabled.
    NotificationsDisabled,
}

struct Pending {
    command: Command,
    offset: usize,
    total: usize,
}

/// Single-slot SMP client.
pub struct SmpClient {
    pending: Option<Pending>,
    rsp_buf: Vec<u8>,
    capacity: usize,
    max_data: usize,
    seq: u8,
}

impl SmpClient {
    /// `capacity` bounds a reassembled response; `max_data` bounds the
    /// `data` field of a file response.
    pub fn new(capacity: usize, max_data: usize) -> Self {
        Self {
            pending: None,
            rsp_buf: Vec::with_capacity(capacity),
            capacity,
            max_data,
            seq: 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_command(&self) -> Option<Command> {
        self.pending.as_ref().map(|p| p.command)
    }

    /// Drop any in-flight command (link loss). Nothing is sent to the peer.
    pub fn reset(&mut self) {
        self.pending = None;
        self.rsp_buf.clear();
    }

    // ── Requests ─────────────────────────────────────────────

    pub fn send_challenge_read(
        &mut self,
        link: &mut impl SmpTransport,
        off: u32,
    ) -> Result<(), SmpError> {
        let body = cbor::encode_file_read(CHALLENGE_FILE, off)?;
        self.send(link, Command::ChallengeRead, MGMT_OP_READ, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, &body)
    }

    pub fn send_challenge_write(
        &mut self,
        link: &mut impl SmpTransport,
        data: &[u8],
    ) -> Result<(), SmpError> {
        let body = cbor::encode_file_write(CHALLENGE_RSP_FILE, 0, data, data.len() as u32)?;
        self.send(link, Command::ChallengeWrite, MGMT_OP_WRITE, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, &body)
    }

    pub fn send_download(
        &mut self,
        link: &mut impl SmpTransport,
        off: u32,
    ) -> Result<(), SmpError> {
        let body = cbor::encode_file_read(LOG_FILE, off)?;
        self.send(link, Command::FileDownload, MGMT_OP_READ, MGMT_GROUP_ID_FS, FS_MGMT_ID_FILE, &body)
    }

    pub fn send_echo(&mut self, link: &mut impl SmpTransport, n: u32) -> Result<(), SmpError> {
        let text = format!("Echo message: {n}");
        let body = cbor::encode_echo(&text)?;
        self.send(link, Command::Echo, MGMT_OP_WRITE, MGMT_GROUP_ID_OS, OS_MGMT_ID_ECHO, &body)
    }

    /// Frame and write one request. Check order: link, MTU, busy.
    fn send(
        &mut self,
        link: &mut impl SmpTransport,
        command: Command,
        op: u8,
        group: u16,
        id: u8,
        body: &[u8],
    ) -> Result<(), SmpError> {
        let Some(mtu) = link.smp_mtu() else {
            error!("SMP: no sensor link");
            return Err(SmpError::NotConnected);
        };
        let frame = header::encode_frame(op, group, id, self.seq, body);
        if frame.len() > mtu {
            error!("SMP: command size ({}) cannot fit MTU ({})", frame.len(), mtu);
            return Err(SmpError::SizeError);
        }
        if self.pending.is_some() {
            error!("SMP: response still pending");
            return Err(SmpError::Busy);
        }

        self.rsp_buf.clear();
        self.pending = Some(Pending {
            command,
            offset: 0,
            total: 0,
        });
        if let Err(e) = link.smp_write(&frame) {
            error!("SMP: GATT write failed: {}", e);
            self.pending = None;
            return Err(SmpError::Write);
        }
        self.seq = self.seq.wrapping_add(1);
        debug!("SMP: {:?} sent ({} bytes)", command, frame.len());
        Ok(())
    }

    // ── Responses ────────────────────────────────────────────

    /// Feed one notification. `None` means the stack disabled notifications.
    pub fn on_notify(&mut self, fragment: Option<&[u8]>) -> NotifyOutcome {
        let Some(data) = fragment else {
            debug!("SMP: notifications disabled");
            self.reset();
            return NotifyOutcome::NotificationsDisabled;
        };
        let Some(pending) = self.pending.as_mut() else {
            error!("SMP: unsolicited notification ({} bytes)", data.len());
            return NotifyOutcome::Unsolicited;
        };
        let command = pending.command;

        if pending.offset == 0 {
            match SmpHeader::parse(data) {
                Ok(hdr) => pending.total = hdr.frame_len(),
                Err(e) => {
                    self.reset();
                    return NotifyOutcome::Complete(command, Err(e.into()));
                }
            }
        }

        if pending.offset + data.len() > self.capacity || pending.total > self.capacity {
            warn!(
                "SMP: response overflow (offset {}, chunk {}, total {}, cap {})",
                pending.offset,
                data.len(),
                pending.total,
                self.capacity
            );
            self.reset();
            return NotifyOutcome::Complete(command, Err(SmpError::MessageTooLarge));
        }

        self.rsp_buf.extend_from_slice(data);
        pending.offset += data.len();
        if pending.offset < pending.total {
            return NotifyOutcome::InProgress;
        }

        let total = pending.total;
        self.pending = None;
        let result = self.decode(command, total);
        self.rsp_buf.clear();
        NotifyOutcome::Complete(command, result)
    }

    fn decode(&self, command: Command, total: usize) -> Result<Response, SmpError> {
        let frame = &self.rsp_buf[..total];
        let hdr = SmpHeader::parse(frame)?;
        let (op, group, id) = command.expected();
        if hdr.op != op {
            return Err(ProtocolError::UnexpectedOp(hdr.op).into());
        }
        if hdr.group != group {
            return Err(ProtocolError::UnexpectedGroup(hdr.group).into());
        }
        if hdr.id != id {
            return Err(ProtocolError::UnexpectedId(hdr.id).into());
        }

        let body = &frame[SMP_HEADER_SIZE..];
        match command {
            Command::Echo => Ok(Response::Echo(EchoResponse::decode(body)?)),
            _ => Ok(Response::File(FileResponse::decode(body, self.max_data)?)),
        }
    }
}
