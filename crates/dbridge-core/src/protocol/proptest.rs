//! Property-based tests for the protocol codec.
//!
//! These tests use proptest to verify:
//! - Length prefix encoding for every legal payload size
//! - Acknowledgment detection is exact
//! - Frame decoding never panics on arbitrary input

#![cfg(test)]

use bytes::BytesMut;
use proptest::prelude::*;

use crate::constants::OKAY;
use crate::protocol::{decode_frame, decode_length, encode_length, encode_request, is_affirmative};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    #[test]
    fn length_prefix_roundtrip(len in 0usize..=0xFFFF) {
        let encoded = encode_length(len).unwrap();
        prop_assert!(encoded.iter().all(|b| b.is_ascii_hexdigit()));
        prop_assert_eq!(decode_length(&encoded), Some(len));
    }

    #[test]
    fn oversized_lengths_rejected(len in 0x1_0000usize..=usize::MAX / 2) {
        prop_assert!(encode_length(len).is_err());
    }

    #[test]
    fn request_frame_prefix_matches_payload(payload in "[ -~]{0,512}") {
        let frame = encode_request(&payload).unwrap();
        prop_assert_eq!(decode_length(&frame), Some(payload.len()));
        prop_assert_eq!(&frame[4..], payload.as_bytes());
    }

    #[test]
    fn affirmative_is_exact(token in any::<[u8; 4]>(), tail in prop::collection::vec(any::<u8>(), 0..16)) {
        let mut bytes = token.to_vec();
        bytes.extend_from_slice(&tail);
        prop_assert_eq!(is_affirmative(&bytes), &token == OKAY);
    }

    #[test]
    fn truncated_input_is_never_affirmative(cut in 0usize..4) {
        prop_assert!(!is_affirmative(&OKAY[..cut]));
    }

    #[test]
    fn decode_frame_never_panics(data in prop::collection::vec(any::<u8>(), 0..10000)) {
        let mut buf = BytesMut::from(&data[..]);
        // May return Ok(None), Ok(Some) or Err
        let _ = decode_frame(&mut buf);
    }

    #[test]
    fn partial_frame_leaves_buffer(payload in prop::collection::vec(any::<u8>(), 1..256), cut_from_end in 1usize..=4) {
        let mut frame = encode_length(payload.len()).unwrap().to_vec();
        frame.extend_from_slice(&payload);
        let keep = frame.len().saturating_sub(cut_from_end);
        let mut buf = BytesMut::from(&frame[..keep]);
        prop_assert!(decode_frame(&mut buf).unwrap().is_none());
        prop_assert_eq!(buf.len(), keep);
    }
}
