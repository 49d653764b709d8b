//! 8-byte SMP header.
//!
//! ```text
//! ┌────┬───────┬────────┬────────┬──────────┬──────────┬─────┬────┐
//! │ op │ flags │ len_h8 │ len_l8 │ group_h8 │ group_l8 │ seq │ id │
//! └────┴───────┴────────┴────────┴──────────┴──────────┴─────┴────┘
//! ```
//! `len` counts the CBOR body only, not the header.

use crate::error::ProtocolError;

pub const SMP_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmpHeader {
    pub op: u8,
    pub flags: u8,
    pub len: u16,
    pub group: u16,
    pub seq: u8,
    pub id: u8,
}

impl SmpHeader {
    pub fn to_bytes(&self) -> [u8; SMP_HEADER_SIZE] {
        let [len_h8, len_l8] = self.len.to_be_bytes();
        let [group_h8, group_l8] = self.group.to_be_bytes();
        [
            self.op, self.flags, len_h8, len_l8, group_h8, group_l8, self.seq, self.id,
        ]
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ProtocolError> {
        let h = buf.get(..SMP_HEADER_SIZE).ok_or(ProtocolError::ShortHeader)?;
        Ok(Self {
            op: h[0],
            flags: h[1],
            len: u16::from_be_bytes([h[2], h[3]]),
            group: u16::from_be_bytes([h[4], h[5]]),
            seq: h[6],
            id: h[7],
        })
    }

    /// Total frame size: header plus declared body.
    pub fn frame_len(&self) -> usize {
        SMP_HEADER_SIZE + usize::from(self.len)
    }
}

/// Prefix `body` with a header describing it.
pub fn encode_frame(op: u8, group: u16, id: u8, seq: u8, body: &[u8]) -> Vec<u8> {
    let hdr = SmpHeader {
        op,
        flags: 0,
        len: body.len() as u16,
        group,
        seq,
        id,
    };
    let mut frame = Vec::with_capacity(SMP_HEADER_SIZE + body.len());
    frame.extend_from_slice(&hdr.to_bytes());
    frame.extend_from_slice(body);
    frame
}
