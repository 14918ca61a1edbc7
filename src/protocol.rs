//! Binary wire protocol for the record ingest stream.
//!
//! A producer connection carries big-endian length-prefixed frames, one
//! record per frame:
//!
//! ```text
//! frame := len:u32be  body
//! body  := id_len:u16be  device_id:utf8[id_len]  timestamp_ms:i64be  payload
//! ```
//!
//! The payload is the remainder of the body and may be empty, as may the
//! device identifier. After the last frame the producer half-closes its write
//! side and reads a single acknowledgement byte.

use thiserror::Error;

use crate::Record;

/// Bytes of the length prefix in front of every frame body.
pub const FRAME_HEADER_BYTES: usize = 4;
/// Fixed bytes of a frame body: device id length plus timestamp.
pub const RECORD_HEADER_BYTES: usize = 2 + 8;
/// Largest device identifier the wire header can carry.
pub const MAX_DEVICE_ID_BYTES: usize = u16::MAX as usize;

/// Acknowledgement byte for a cleanly terminated stream.
pub const ACK_OK: u8 = 1;
/// Acknowledgement byte written before closing a rejected stream.
pub const ACK_FAILED: u8 = 0;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too small: need {need} bytes, got {got}")]
    FrameTooSmall { need: usize, got: usize },
    #[error("frame of {len} bytes exceeds limit {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("device id of {len} bytes does not fit the wire header")]
    DeviceIdTooLong { len: usize },
    #[error("device id is not valid UTF-8: {0}")]
    DeviceIdEncoding(#[from] std::str::Utf8Error),
}

/// Appends one framed record to `buf`.
pub fn encode_frame(record: &Record, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    let id = record.device_id.as_bytes();
    if id.len() > MAX_DEVICE_ID_BYTES {
        return Err(ProtocolError::DeviceIdTooLong { len: id.len() });
    }
    let body_len = RECORD_HEADER_BYTES + id.len() + record.payload.len();
    let prefix = u32::try_from(body_len).map_err(|_| ProtocolError::FrameTooLarge {
        len: body_len,
        max: u32::MAX as usize,
    })?;

    buf.extend_from_slice(&prefix.to_be_bytes());
    buf.extend_from_slice(&(id.len() as u16).to_be_bytes());
    buf.extend_from_slice(id);
    buf.extend_from_slice(&record.timestamp_ms.to_be_bytes());
    buf.extend_from_slice(&record.payload);
    Ok(())
}

/// Decodes a complete frame body into a record.
pub fn decode_frame(body: &[u8]) -> Result<Record, ProtocolError> {
    if body.len() < RECORD_HEADER_BYTES {
        return Err(ProtocolError::FrameTooSmall {
            need: RECORD_HEADER_BYTES,
            got: body.len(),
        });
    }
    let id_len = u16::from_be_bytes([body[0], body[1]]) as usize;
    let need = RECORD_HEADER_BYTES + id_len;
    if body.len() < need {
        return Err(ProtocolError::FrameTooSmall {
            need,
            got: body.len(),
        });
    }

    let device_id = std::str::from_utf8(&body[2..2 + id_len])?.to_string();
    let ts_start = 2 + id_len;
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&body[ts_start..ts_start + 8]);
    let payload = body[ts_start + 8..].to_vec();

    Ok(Record {
        device_id,
        timestamp_ms: i64::from_be_bytes(ts),
        payload,
    })
}
