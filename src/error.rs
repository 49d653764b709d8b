//! Unified error types for the gateway firmware.
//!
//! Each subsystem defines its own error enum; they all convert into the
//! top-level [`Error`] via `From` so the `?` operator works across module
//! boundaries.

use core::fmt;

use crate::smp::MgmtErr;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Top-level error type for the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Smp(SmpError),
    Codec(CodecError),
    Crypto(CryptoError),
    Stash(StashError),
    Ble(BleError),
    Cloud(CloudError),
    /// Configuration rejected by validation.
    Config(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smp(e) => write!(f, "smp: {e}"),
            Self::Codec(e) => write!(f, "codec: {e}"),
            Self::Crypto(e) => write!(f, "crypto: {e}"),
            Self::Stash(e) => write!(f, "stash: {e}"),
            Self::Ble(e) => write!(f, "ble: {e}"),
            Self::Cloud(e) => write!(f, "cloud: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// SMP transport errors
// ---------------------------------------------------------------------------

/// Failures of the SMP request/response shim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmpError {
    /// No sensor link is up.
    NotConnected,
    /// Request does not fit in the negotiated MTU.
    SizeError,
    /// A response to an earlier request is still outstanding.
    Busy,
    /// Reassembled response would overrun the response buffer.
    MessageTooLarge,
    /// The response arrived but did not match the request.
    Protocol(ProtocolError),
    /// The GATT write itself failed.
    Write,
}

impl SmpError {
    /// mcumgr result code used when this error aborts a transfer.
    pub const fn mgmt_err(self) -> MgmtErr {
        match self {
            Self::NotConnected => MgmtErr::EBadState,
            Self::SizeError | Self::MessageTooLarge => MgmtErr::EMsgSize,
            Self::Busy => MgmtErr::EBadState,
            Self::Protocol(p) => p.mgmt_err(),
            Self::Write => MgmtErr::EUnknown,
        }
    }
}

impl fmt::Display for SmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "not connected"),
            Self::SizeError => write!(f, "request exceeds MTU"),
            Self::Busy => write!(f, "response pending"),
            Self::MessageTooLarge => write!(f, "response too large"),
            Self::Protocol(p) => write!(f, "protocol: {p}"),
            Self::Write => write!(f, "GATT write failed"),
        }
    }
}

impl From<SmpError> for Error {
    fn from(e: SmpError) -> Self {
        Self::Smp(e)
    }
}

/// A response that cannot belong to the request in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Fewer than 8 bytes of SMP header.
    ShortHeader,
    UnexpectedOp(u8),
    UnexpectedGroup(u16),
    UnexpectedId(u8),
    /// CBOR body did not decode into the expected map.
    Cbor,
}

impl ProtocolError {
    pub const fn mgmt_err(self) -> MgmtErr {
        match self {
            Self::ShortHeader | Self::Cbor => MgmtErr::EInval,
            Self::UnexpectedOp(_) | Self::UnexpectedGroup(_) | Self::UnexpectedId(_) => {
                MgmtErr::ENotSup
            }
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShortHeader => write!(f, "short SMP header"),
            Self::UnexpectedOp(op) => write!(f, "unexpected op {op}"),
            Self::UnexpectedGroup(g) => write!(f, "unexpected group {g}"),
            Self::UnexpectedId(id) => write!(f, "unexpected id {id}"),
            Self::Cbor => write!(f, "CBOR decode failed"),
        }
    }
}

impl From<ProtocolError> for SmpError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Self::Smp(SmpError::Protocol(e))
    }
}

// ---------------------------------------------------------------------------
// Log codec errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// Buffer ends before the structure does.
    Truncated,
    /// Entry does not begin with the start byte.
    BadStartByte(u8),
    CrcMismatch { received: u16, computed: u16 },
    UnsupportedVersion(u16),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated"),
            Self::BadStartByte(b) => write!(f, "bad start byte 0x{b:02X}"),
            Self::CrcMismatch { received, computed } => {
                write!(f, "CRC mismatch (rx {received:04X}, calc {computed:04X})")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported entry protocol {v:04X}"),
        }
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

// ---------------------------------------------------------------------------
// Crypto errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    BadKeyLength,
    /// Input is not a whole number of AES blocks (or lacks an IV).
    BadLength,
    BufferTooSmall,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadKeyLength => write!(f, "bad key length"),
            Self::BadLength => write!(f, "input not block aligned"),
            Self::BufferTooSmall => write!(f, "output buffer too small"),
        }
    }
}

impl From<CryptoError> for Error {
    fn from(e: CryptoError) -> Self {
        Self::Crypto(e)
    }
}

// ---------------------------------------------------------------------------
// Stash errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StashError {
    /// Entry would overflow the stash; it was discarded.
    Full,
}

impl fmt::Display for StashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "no space left in entry stash"),
        }
    }
}

impl From<StashError> for Error {
    fn from(e: StashError) -> Self {
        Self::Stash(e)
    }
}

// ---------------------------------------------------------------------------
// BLE stack errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleError {
    /// Module used before `initialize`.
    NotInitialized,
    NotConnected,
    /// Raw error code reported by the platform stack.
    Stack(i32),
}

impl fmt::Display for BleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "not initialised"),
            Self::NotConnected => write!(f, "not connected"),
            Self::Stack(code) => write!(f, "stack error {code}"),
        }
    }
}

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Self::Ble(e)
    }
}

// ---------------------------------------------------------------------------
// Cloud errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudError {
    NotConnected,
    /// The publish primitive returned a non-zero code.
    Publish(i32),
    /// Payload larger than the publish buffer.
    TooLarge,
    /// Publish buffer could not be acquired in time.
    Timeout,
}

impl fmt::Display for CloudError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConnected => write!(f, "cloud not connected"),
            Self::Publish(code) => write!(f, "publish failed ({code})"),
            Self::TooLarge => write!(f, "payload too large"),
            Self::Timeout => write!(f, "publish buffer busy"),
        }
    }
}

impl From<CloudError> for Error {
    fn from(e: CloudError) -> Self {
        Self::Cloud(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Firmware-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
