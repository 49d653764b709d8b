//! SMP (mcumgr) file-transfer shim over the sensor's GATT characteristic.
//!
//! ```text
//!  request:  [ SMP header 8B ][ CBOR map ]  ── GATT write w/o response ──▶
//!  response: [ SMP header 8B ][ CBOR map ]  ◀── notify, 1..n fragments ──
//! ```
//!
//! At most one request is in flight. The client reassembles notify
//! fragments by the header's declared length, validates op/group/id
//! against the request and hands the decoded body back as one completion.

pub mod cbor;
pub mod client;
pub mod header;

pub use cbor::{EchoResponse, FileResponse};
pub use client::{Command, NotifyOutcome, Response, SmpClient, SmpTransport};
pub use header::{SMP_HEADER_SIZE, SmpHeader};

// ── Opcodes ──────────────────────────────────────────────────

pub const MGMT_OP_READ: u8 = 0;
pub const MGMT_OP_READ_RSP: u8 = 1;
pub const MGMT_OP_WRITE: u8 = 2;
pub const MGMT_OP_WRITE_RSP: u8 = 3;

// ── Groups / command ids ─────────────────────────────────────

pub const MGMT_GROUP_ID_OS: u16 = 0;
pub const MGMT_GROUP_ID_FS: u16 = 8;

pub const OS_MGMT_ID_ECHO: u8 = 0;
pub const FS_MGMT_ID_FILE: u8 = 0;

// ── Sensor file paths ────────────────────────────────────────

pub const CHALLENGE_FILE: &str = "/sys/challenge.bin";
pub const CHALLENGE_RSP_FILE: &str = "/sys/challenge_rsp.bin";
pub const LOG_FILE: &str = "/log/ct";

/// mcumgr result codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum MgmtErr {
    EOk = 0,
    EUnknown = 1,
    ENoMem = 2,
    EInval = 3,
    ETimeout = 4,
    ENoEnt = 5,
    EBadState = 6,
    EMsgSize = 7,
    ENotSup = 8,
}

impl MgmtErr {
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Map a raw `rc`; unknown values collapse to `EUnknown`.
    pub const fn from_code(rc: i32) -> Self {
        match rc {
            0 => Self::EOk,
            2 => Self::ENoMem,
            3 => Self::EInval,
            4 => Self::ETimeout,
            5 => Self::ENoEnt,
            6 => Self::EBadState,
            7 => Self::EMsgSize,
            8 => Self::ENotSup,
            _ => Self::EUnknown,
        }
    }
}

impl core::fmt::Display for MgmtErr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}
