//! Protocol module for the bridge wire format.
//!
//! This module provides:
//! - Hex length-prefixed request framing
//! - Status token checks and response frame splitting
//! - Streaming frame extraction for long-lived sessions
//! - Typed request payloads

mod codec;
mod request;

#[cfg(test)]
mod proptest;

pub use codec::{
    Packet, Status, decode_frame, decode_length, encode_length, encode_request, is_affirmative,
    split_status_payload,
};
pub use request::Request;
