//! Frame codec.
//!
//! ## Wire format
//!
//! ```text
//! frame {
//!     len:  u32 (big-endian), // length of tag + body
//!     tag:  u8,               // message type, see messages::TAG_*
//!     body: [u8; len - 1],    // CBOR-encoded payload struct
//! }
//! ```

use crate::cbor;
use crate::messages::{
    Message, RevInit, RevShare, SecConf, SecInit, TAG_REV_INIT, TAG_REV_SHARE, TAG_SEC_CONF,
    TAG_SEC_INIT,
};
use crate::TransportError;

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Maximum value of the length prefix (to prevent allocation attacks).
pub const MAX_FRAME_SIZE: usize = 1 << 20;

/// Encode a message into a complete frame.
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if the body cannot be encoded and
/// [`TransportError::ProtocolViolation`] if the frame would exceed
/// [`MAX_FRAME_SIZE`].
pub fn encode(msg: &Message) -> Result<Vec<u8>, TransportError> {
    let body = match msg {
        Message::SecInit(m) => cbor::to_vec_named(m, "SecInit")?,
        Message::SecConf(m) => cbor::to_vec_named(m, "SecConf")?,
        Message::RevInit(m) => cbor::to_vec_named(m, "RevInit")?,
        Message::RevShare(m) => cbor::to_vec_named(m, "RevShare")?,
    };
    let len = body.len() + 1;
    if len > MAX_FRAME_SIZE {
        return Err(TransportError::ProtocolViolation(format!(
            "frame too large: {len} bytes, max {MAX_FRAME_SIZE}"
        )));
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + len);
    frame.extend_from_slice(&(len as u32).to_be_bytes());
    frame.push(msg.tag());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Read the length prefix of a frame.
///
/// Returns `Ok(None)` if fewer than [`HEADER_SIZE`] bytes are available.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolViolation`] for an empty or oversized
/// length.
pub fn frame_len(buf: &[u8]) -> Result<Option<usize>, TransportError> {
    let Some(header) = buf.get(..HEADER_SIZE) else {
        return Ok(None);
    };
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(header);
    let len = u32::from_be_bytes(raw) as usize;
    if len == 0 || len > MAX_FRAME_SIZE {
        return Err(TransportError::ProtocolViolation(format!(
            "invalid frame length {len}"
        )));
    }
    Ok(Some(len))
}

/// Decode exactly one complete frame.
///
/// # Errors
///
/// Returns [`TransportError::ProtocolViolation`] if the frame is truncated,
/// has trailing bytes or carries an unknown tag, and
/// [`TransportError::Deserialization`] if the body does not decode.
pub fn decode(frame: &[u8]) -> Result<Message, TransportError> {
    let len = frame_len(frame)?
        .ok_or_else(|| TransportError::ProtocolViolation("truncated header".to_string()))?;
    if frame.len() != HEADER_SIZE + len {
        return Err(TransportError::ProtocolViolation(format!(
            "frame length {len} does not match {} payload bytes",
            frame.len() - HEADER_SIZE
        )));
    }

    let tag = frame[HEADER_SIZE];
    let body = &frame[HEADER_SIZE + 1..];
    match tag {
        TAG_SEC_INIT => Ok(Message::SecInit(cbor::from_slice_named::<SecInit>(
            body, "SecInit",
        )?)),
        TAG_SEC_CONF => Ok(Message::SecConf(cbor::from_slice_named::<SecConf>(
            body, "SecConf",
        )?)),
        TAG_REV_INIT => Ok(Message::RevInit(cbor::from_slice_named::<RevInit>(
            body, "RevInit",
        )?)),
        TAG_REV_SHARE => Ok(Message::RevShare(cbor::from_slice_named::<RevShare>(
            body, "RevShare",
        )?)),
        other => Err(TransportError::ProtocolViolation(format!(
            "unknown message tag 0x{other:02x}"
        ))),
    }
}
