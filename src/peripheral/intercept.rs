//! SMP file uploads from a central, mapped onto persisted settings.
//!
//! | Path                        | Content                      | Applies to   |
//! |-----------------------------|------------------------------|--------------|
//! | `/nv/ble_network_id.txt`    | hex text, whitespace-trimmed | network id   |
//! | `/nv/aes_key.bin`           | 16 raw bytes                 | sensor key   |
//! | `/nv/aws_topic_prefix.txt`  | text, whitespace-trimmed     | topic prefix |
//!
//! Every upload is taken whole from its first chunk; the reply always
//! reports `off = data.len()`.

use log::{debug, error, info};

use crate::app::ports::KeyStore;
use crate::config::TOPIC_PREFIX_MAX;
use crate::crypto::{AES_KEY_SIZE, AesKey};
use crate::error::ProtocolError;
use crate::smp::cbor::{self, FileUpload};
use crate::smp::header::encode_frame;
use crate::smp::{
    FS_MGMT_ID_FILE, MGMT_GROUP_ID_FS, MGMT_OP_WRITE, MGMT_OP_WRITE_RSP, MgmtErr,
    SMP_HEADER_SIZE, SmpHeader,
};

pub const NV_NETWORK_ID_FILE: &str = "/nv/ble_network_id.txt";
pub const NV_AES_KEY_FILE: &str = "/nv/aes_key.bin";
pub const NV_TOPIC_PREFIX_FILE: &str = "/nv/aws_topic_prefix.txt";

/// A decoded settings write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NvWrite {
    NetworkId(u16),
    AesKey(AesKey),
    TopicPrefix(heapless::String<TOPIC_PREFIX_MAX>),
}

/// Split a request frame into its header and upload body. Only file
/// writes of the FS group are accepted.
pub fn decode_request(frame: &[u8]) -> Result<(SmpHeader, FileUpload), ProtocolError> {
    let hdr = SmpHeader::parse(frame)?;
    if hdr.op != MGMT_OP_WRITE {
        return Err(ProtocolError::UnexpectedOp(hdr.op));
    }
    if hdr.group != MGMT_GROUP_ID_FS {
        return Err(ProtocolError::UnexpectedGroup(hdr.group));
    }
    if hdr.id != FS_MGMT_ID_FILE {
        return Err(ProtocolError::UnexpectedId(hdr.id));
    }
    let body = frame
        .get(SMP_HEADER_SIZE..hdr.frame_len())
        .ok_or(ProtocolError::Cbor)?;
    Ok((hdr, FileUpload::decode(body)?))
}

fn trimmed_text(data: &[u8]) -> Result<&str, MgmtErr> {
    core::str::from_utf8(data)
        .map(str::trim)
        .map_err(|_| MgmtErr::EInval)
}

/// Map an upload to the setting it writes. `chunk_max` bounds the data
/// the way the file manager's chunk buffer does.
pub fn map_upload(upload: &FileUpload, chunk_max: usize) -> Result<NvWrite, MgmtErr> {
    debug!(
        "NV: receiving '{}' {}/{}",
        upload.name,
        upload.off as usize + upload.data.len(),
        upload.len.unwrap_or(0)
    );
    let data = &upload.data;
    if data.len() + 1 >= chunk_max {
        return Err(MgmtErr::EInval);
    }
    match upload.name.as_str() {
        NV_NETWORK_ID_FILE => {
            let text = trimmed_text(data)?;
            let digits = text
                .strip_prefix("0x")
                .or_else(|| text.strip_prefix("0X"))
                .unwrap_or(text);
            let id = u32::from_str_radix(digits, 16).map_err(|_| MgmtErr::EInval)?;
            Ok(NvWrite::NetworkId((id & 0xFFFF) as u16))
        }
        NV_AES_KEY_FILE => {
            let key: AesKey = data.as_slice().try_into().map_err(|_| {
                error!("NV: AES key must be {} bytes, got {}", AES_KEY_SIZE, data.len());
                MgmtErr::EInval
            })?;
            Ok(NvWrite::AesKey(key))
        }
        NV_TOPIC_PREFIX_FILE => {
            let text = trimmed_text(data)?;
            let prefix = heapless::String::try_from(text).map_err(|_| MgmtErr::EInval)?;
            Ok(NvWrite::TopicPrefix(prefix))
        }
        other => {
            error!("NV: no setting mapped to '{}'", other);
            Err(MgmtErr::EInval)
        }
    }
}

/// Persist `write`.
pub fn apply(write: &NvWrite, store: &mut impl KeyStore) -> Result<(), MgmtErr> {
    let res = match write {
        NvWrite::NetworkId(id) => store.set_network_id(*id),
        NvWrite::AesKey(key) => store.set_aes_key(key),
        NvWrite::TopicPrefix(prefix) => store.set_topic_prefix(prefix),
    };
    res.map_err(|e| {
        error!("NV: write failed: {}", e);
        MgmtErr::EInval
    })?;
    match write {
        NvWrite::NetworkId(id) => info!("NV: network id {:04X}", id),
        NvWrite::AesKey(_) => info!("NV: AES key updated"),
        NvWrite::TopicPrefix(p) => info!("NV: topic prefix '{}'", p),
    }
    Ok(())
}

/// Reply frame for the request `req`.
pub fn response_frame(req: &SmpHeader, rc: MgmtErr, off: u32) -> Result<Vec<u8>, ProtocolError> {
    let body = cbor::encode_upload_response(rc.code(), off)?;
    Ok(encode_frame(
        MGMT_OP_WRITE_RSP,
        req.group,
        req.id,
        req.seq,
        &body,
    ))
}
