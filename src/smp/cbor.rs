//! CBOR bodies of the SMP commands the gateway uses.
//!
//! | Command            | Request                      | Response            |
//! |--------------------|------------------------------|---------------------|
//! | file read          | `{name, off}`                | `{off, data, rc, len}` |
//! | file write         | `{name, off, data, len}`     | `{off, rc}`         |
//! | echo               | `{d}`                        | `{r}`               |
//!
//! Responses may use definite or indefinite-length maps; unknown keys are
//! skipped.

use minicbor::data::Type;
use minicbor::{Decoder, Encoder};

use crate::error::ProtocolError;

fn cbor_err<E>(_: E) -> ProtocolError {
    ProtocolError::Cbor
}

// ── Requests ─────────────────────────────────────────────────

/// `{name, off}`: file read (download / challenge fetch).
pub fn encode_file_read(name: &str, off: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut e = Encoder::new(Vec::new());
    e.map(2)
        .and_then(|e| e.str("name"))
        .and_then(|e| e.str(name))
        .and_then(|e| e.str("off"))
        .and_then(|e| e.u32(off))
        .map_err(cbor_err)?;
    Ok(e.into_writer())
}

/// `{name, off, data, len}`: file write (challenge response upload).
pub fn encode_file_write(
    name: &str,
    off: u32,
    data: &[u8],
    len: u32,
) -> Result<Vec<u8>, ProtocolError> {
    let mut e = Encoder::new(Vec::new());
    e.map(4)
        .and_then(|e| e.str("name"))
        .and_then(|e| e.str(name))
        .and_then(|e| e.str("off"))
        .and_then(|e| e.u32(off))
        .and_then(|e| e.str("data"))
        .and_then(|e| e.bytes(data))
        .and_then(|e| e.str("len"))
        .and_then(|e| e.u32(len))
        .map_err(cbor_err)?;
    Ok(e.into_writer())
}

/// `{d}`: OS echo.
pub fn encode_echo(text: &str) -> Result<Vec<u8>, ProtocolError> {
    let mut e = Encoder::new(Vec::new());
    e.map(1)
        .and_then(|e| e.str("d"))
        .and_then(|e| e.str(text))
        .map_err(cbor_err)?;
    Ok(e.into_writer())
}

/// `{rc, off}`: reply to a file upload received from a central.
pub fn encode_upload_response(rc: i32, off: u32) -> Result<Vec<u8>, ProtocolError> {
    let mut e = Encoder::new(Vec::new());
    e.map(2)
        .and_then(|e| e.str("rc"))
        .and_then(|e| e.i32(rc))
        .and_then(|e| e.str("off"))
        .and_then(|e| e.u32(off))
        .map_err(cbor_err)?;
    Ok(e.into_writer())
}

// ── Map walking ──────────────────────────────────────────────

/// Call `field` once per key of the map at the decoder position.
fn for_each_field<'b>(
    d: &mut Decoder<'b>,
    mut field: impl FnMut(&'b str, &mut Decoder<'b>) -> Result<(), ProtocolError>,
) -> Result<(), ProtocolError> {
    match d.map().map_err(cbor_err)? {
        Some(n) => {
            for _ in 0..n {
                let key = d.str().map_err(cbor_err)?;
                field(key, d)?;
            }
        }
        None => {
            while d.datatype().map_err(cbor_err)? != Type::Break {
                let key = d.str().map_err(cbor_err)?;
                field(key, d)?;
            }
        }
    }
    Ok(())
}

// ── Responses ────────────────────────────────────────────────

/// Body of a file read/write response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileResponse {
    pub off: u32,
    pub data: Vec<u8>,
    /// mcumgr result code; absent means 0.
    pub rc: i32,
    /// Total file length; sent with the first chunk only.
    pub len: Option<u32>,
}

impl FileResponse {
    /// Decode, refusing a `data` field longer than `max_data`.
    pub fn decode(body: &[u8], max_data: usize) -> Result<Self, ProtocolError> {
        let mut d = Decoder::new(body);
        let mut rsp = Self::default();
        for_each_field(&mut d, |key, d| {
            match key {
                "off" => rsp.off = d.u32().map_err(cbor_err)?,
                "rc" => rsp.rc = d.i32().map_err(cbor_err)?,
                "len" => rsp.len = Some(d.u32().map_err(cbor_err)?),
                "data" => {
                    let data = d.bytes().map_err(cbor_err)?;
                    if data.len() > max_data {
                        return Err(ProtocolError::Cbor);
                    }
                    rsp.data = data.to_vec();
                }
                _ => d.skip().map_err(cbor_err)?,
            }
            Ok(())
        })?;
        Ok(rsp)
    }

    /// Encode as a sensor would (used by simulators and tests).
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut e = Encoder::new(Vec::new());
        let n = if self.len.is_some() { 4 } else { 3 };
        e.map(n)
            .and_then(|e| e.str("off"))
            .and_then(|e| e.u32(self.off))
            .and_then(|e| e.str("data"))
            .and_then(|e| e.bytes(&self.data))
            .and_then(|e| e.str("rc"))
            .and_then(|e| e.i32(self.rc))
            .map_err(cbor_err)?;
        if let Some(len) = self.len {
            e.str("len").and_then(|e| e.u32(len)).map_err(cbor_err)?;
        }
        Ok(e.into_writer())
    }
}

/// Body of an echo response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EchoResponse {
    pub r: String,
    pub rc: i32,
}

impl EchoResponse {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut d = Decoder::new(body);
        let mut rsp = Self::default();
        for_each_field(&mut d, |key, d| {
            match key {
                "r" => rsp.r = d.str().map_err(cbor_err)?.into(),
                "rc" => rsp.rc = d.i32().map_err(cbor_err)?,
                _ => d.skip().map_err(cbor_err)?,
            }
            Ok(())
        })?;
        Ok(rsp)
    }
}

/// A file upload received from a central (`{name, off, data, len}`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileUpload {
    pub name: String,
    pub off: u32,
    pub data: Vec<u8>,
    pub len: Option<u32>,
}

impl FileUpload {
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let mut d = Decoder::new(body);
        let mut req = Self::default();
        for_each_field(&mut d, |key, d| {
            match key {
                "name" => req.name = d.str().map_err(cbor_err)?.into(),
                "off" => req.off = d.u32().map_err(cbor_err)?,
                "data" => req.data = d.bytes().map_err(cbor_err)?.to_vec(),
                "len" => req.len = Some(d.u32().map_err(cbor_err)?),
                _ => d.skip().map_err(cbor_err)?,
            }
            Ok(())
        })?;
        Ok(req)
    }
}
