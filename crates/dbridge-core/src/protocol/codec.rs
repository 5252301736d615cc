//! Wire codec for the bridge line protocol.
//!
//! Format:
//! - Request: 4 ASCII hex digits giving the payload byte length, then the payload
//! - Response: a 4-byte status token (`OKAY`/`FAIL`), optionally followed by a
//!   hex length and that many bytes, or by raw streamed bytes
//!
//! Nothing here performs I/O. Malformed input is reported through return
//! values and `Error::Codec`; callers decide what a failure means.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::{FAIL, LENGTH_PREFIX_LEN, MAX_PAYLOAD_LEN, OKAY, STATUS_LEN};
use crate::error::{Error, Result};

/// Response status token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `OKAY`.
    Okay,
    /// `FAIL`.
    Fail,
    /// Any other four bytes.
    Unknown([u8; 4]),
}

impl Status {
    /// Read the status token at the start of `bytes`.
    ///
    /// Returns `None` when fewer than four bytes are available.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let token: [u8; 4] = bytes.get(..STATUS_LEN)?.try_into().ok()?;
        Some(match &token {
            t if t == OKAY => Status::Okay,
            t if t == FAIL => Status::Fail,
            _ => Status::Unknown(token),
        })
    }

    /// True for `OKAY`.
    pub fn is_okay(&self) -> bool {
        matches!(self, Status::Okay)
    }
}

/// A response frame split into its status and data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Status token, when the frame carried one.
    pub status: Option<Status>,
    /// Length-delimited data following the status.
    pub data: Bytes,
}

impl Packet {
    /// Data decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Render a payload length as four uppercase hex digits.
pub fn encode_length(len: usize) -> Result<[u8; 4]> {
    if len > MAX_PAYLOAD_LEN {
        return Err(Error::Codec {
            message: format!("payload too large: {} bytes (max {})", len, MAX_PAYLOAD_LEN),
        });
    }

    let mut out = [0u8; LENGTH_PREFIX_LEN];
    out.copy_from_slice(format!("{:04X}", len).as_bytes());
    Ok(out)
}

/// Parse the four hex digits at the start of `bytes`.
///
/// Returns `None` if fewer than four bytes are present or any of them is not
/// a hex digit.
pub fn decode_length(bytes: &[u8]) -> Option<usize> {
    let digits = bytes.get(..LENGTH_PREFIX_LEN)?;
    if !digits.iter().all(u8::is_ascii_hexdigit) {
        return None;
    }
    let text = std::str::from_utf8(digits).ok()?;
    usize::from_str_radix(text, 16).ok()
}

/// Frame a request payload: hex length prefix followed by the UTF-8 bytes.
pub fn encode_request(payload: &str) -> Result<Bytes> {
    let prefix = encode_length(payload.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.put_slice(&prefix);
    buf.put_slice(payload.as_bytes());
    Ok(buf.freeze())
}

/// True only if `bytes` starts with the `OKAY` acknowledgment token.
pub fn is_affirmative(bytes: &[u8]) -> bool {
    bytes.get(..STATUS_LEN) == Some(&OKAY[..])
}

/// Split a response frame into status and length-delimited data.
///
/// With `has_status_prefix` the first four bytes are taken as the status
/// token; continuation frames carry no status. A frame holding nothing but a
/// status yields empty data.
pub fn split_status_payload(bytes: &[u8], has_status_prefix: bool) -> Result<Packet> {
    let (status, rest) = if has_status_prefix {
        let status = Status::from_bytes(bytes).ok_or_else(|| Error::Codec {
            message: format!("truncated status: {} bytes", bytes.len()),
        })?;
        (Some(status), &bytes[STATUS_LEN..])
    } else {
        (None, bytes)
    };

    if rest.is_empty() {
        return Ok(Packet {
            status,
            data: Bytes::new(),
        });
    }

    let len = decode_length(rest).ok_or_else(|| Error::Codec {
        message: "invalid length prefix".into(),
    })?;
    let body = &rest[LENGTH_PREFIX_LEN..];
    if body.len() < len {
        return Err(Error::Codec {
            message: format!("truncated payload: expected {} bytes, got {}", len, body.len()),
        });
    }

    Ok(Packet {
        status,
        data: Bytes::copy_from_slice(&body[..len]),
    })
}

/// Extract one length-prefixed frame from a streaming buffer.
///
/// Returns:
/// - Ok(Some(data)) if a complete frame was consumed (buffer is advanced)
/// - Ok(None) if more data is needed (buffer unchanged)
/// - Err if the length prefix is not hex
pub fn decode_frame(buf: &mut BytesMut) -> Result<Option<Bytes>> {
    if buf.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }

    let len = decode_length(buf).ok_or_else(|| Error::Codec {
        message: format!("invalid length prefix {:?}", &buf[..LENGTH_PREFIX_LEN]),
    })?;

    if buf.len() < LENGTH_PREFIX_LEN + len {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_LEN);
    Ok(Some(buf.split_to(len).freeze()))
}
