//! Framing state of one tracking connection.

use bytes::BytesMut;

use dbridge_core::constants::STATUS_LEN;
use dbridge_core::protocol::{Request, decode_frame, is_affirmative};
use dbridge_core::{Error, Result};

/// Where a tracking connection is in its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Request sent; the next four bytes must be the acknowledgment.
    AwaitingFirstFrame,
    /// Every further frame is a length-prefixed device list.
    Streaming,
    Closed,
}

/// Turns raw bytes from a tracking socket into snapshot payloads.
#[derive(Debug)]
pub struct TrackSession {
    state: SessionState,
    buf: BytesMut,
}

impl Default for TrackSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            buf: BytesMut::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin a session and return the request to send.
    pub fn open(&mut self) -> Request {
        self.state = SessionState::AwaitingFirstFrame;
        self.buf.clear();
        Request::TrackDevices
    }

    /// Feed bytes read from the socket and return complete snapshot payloads.
    ///
    /// Any handshake or framing error closes the session.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<String>> {
        match self.state {
            SessionState::Idle | SessionState::Closed => {
                return Err(Error::UnexpectedState {
                    state: format!("tracking data in {:?}", self.state),
                });
            }
            SessionState::AwaitingFirstFrame | SessionState::Streaming => {}
        }
        self.buf.extend_from_slice(data);

        if self.state == SessionState::AwaitingFirstFrame {
            if self.buf.len() < STATUS_LEN {
                return Ok(Vec::new());
            }
            if !is_affirmative(&self.buf) {
                let message = format!(
                    "track-devices not acknowledged: {}",
                    String::from_utf8_lossy(&self.buf)
                );
                self.close();
                return Err(Error::BadResponse { message });
            }
            let _ = self.buf.split_to(STATUS_LEN);
            self.state = SessionState::Streaming;
        }

        let mut payloads = Vec::new();
        loop {
            match decode_frame(&mut self.buf) {
                Ok(Some(frame)) => payloads.push(String::from_utf8_lossy(&frame).into_owned()),
                Ok(None) => return Ok(payloads),
                Err(e) => {
                    self.close();
                    return Err(e);
                }
            }
        }
    }

    pub fn close(&mut self) {
        self.state = SessionState::Closed;
        self.buf.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_requests_tracking() {
        let mut session = TrackSession::new();
        assert_eq!(session.open(), Request::TrackDevices);
        assert_eq!(session.state(), SessionState::AwaitingFirstFrame);
    }

    #[test]
    fn ack_then_frames() {
        let mut session = TrackSession::new();
        session.open();
        assert!(session.feed(b"OKAY").unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Streaming);

        let payloads = session.feed(b"000bA\tdevice\nB\t").unwrap();
        assert_eq!(payloads, vec!["A\tdevice\nB\t".to_string()]);
    }

    #[test]
    fn ack_and_frames_together() {
        let mut session = TrackSession::new();
        session.open();
        let payloads = session.feed(b"OKAY0009A\tdevice\n0000").unwrap();
        assert_eq!(payloads, vec!["A\tdevice\n".to_string(), String::new()]);
    }

    #[test]
    fn frame_split_across_reads() {
        let mut session = TrackSession::new();
        session.open();
        session.feed(b"OK").unwrap();
        assert!(session.feed(b"AY00").unwrap().is_empty());
        assert!(session.feed(b"09A\tdev").unwrap().is_empty());
        assert_eq!(session.feed(b"ice\n").unwrap(), vec!["A\tdevice\n".to_string()]);
    }

    #[test]
    fn failed_handshake_closes() {
        let mut session = TrackSession::new();
        session.open();
        let err = session.feed(b"FAIL0004nope").unwrap_err();
        assert!(matches!(err, Error::BadResponse { .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn bad_frame_closes() {
        let mut session = TrackSession::new();
        session.open();
        session.feed(b"OKAY").unwrap();
        assert!(session.feed(b"zzzz").is_err());
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.feed(b"0000").is_err());
    }

    #[test]
    fn reopen_resets_buffer() {
        let mut session = TrackSession::new();
        session.open();
        session.feed(b"OKAY00").unwrap();
        session.open();
        assert!(session.feed(b"OKAY").unwrap().is_empty());
        assert_eq!(session.state(), SessionState::Streaming);
    }
}
