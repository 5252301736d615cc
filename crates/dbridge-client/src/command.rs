//! One-shot host commands.
//!
//! A command opens its own socket, writes a single request and reads the
//! whole reply before the socket is closed. The reply must open with
//! `OKAY`; anything else becomes [`Error::Protocol`] carrying the server's
//! explanation when it sent one.

use bytes::Bytes;
use tracing::debug;

use dbridge_core::constants::{LENGTH_PREFIX_LEN, STATUS_LEN};
use dbridge_core::protocol::{Request, Status, decode_length, split_status_payload};
use dbridge_core::{BridgeEndpoint, Error, Result};

use crate::connection::{connect, read_to_end, send_request};

/// Runs one-shot requests against the bridge server.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    endpoint: BridgeEndpoint,
}

impl CommandRunner {
    pub fn new(endpoint: BridgeEndpoint) -> Self {
        Self { endpoint }
    }

    /// Server endpoint this runner talks to.
    pub fn endpoint(&self) -> &BridgeEndpoint {
        &self.endpoint
    }

    /// Send `request` and return the data following the `OKAY` status.
    ///
    /// When the reply carries a hex length prefix the delimited payload is
    /// returned, otherwise every byte after the status. Socket failures at
    /// any step are [`Error::Transport`].
    pub async fn run(&self, request: &Request) -> Result<Bytes> {
        let mut stream = connect(&self.endpoint).await?;
        send_request(&mut stream, request)
            .await
            .map_err(|e| transport_error(request, e))?;
        let reply = read_to_end(&mut stream)
            .await
            .map_err(|e| transport_error(request, e))?;
        debug!(%request, len = reply.len(), "command reply");
        parse_reply(request, &reply)
    }
}

fn transport_error(request: &Request, err: Error) -> Error {
    match err {
        Error::Io(e) => Error::Transport {
            message: format!("{}: {}", request, e),
        },
        other => other,
    }
}

fn parse_reply(request: &Request, reply: &[u8]) -> Result<Bytes> {
    match Status::from_bytes(reply) {
        Some(Status::Okay) => {}
        Some(Status::Fail) => {
            let reason = split_status_payload(reply, true)
                .map(|packet| packet.text())
                .unwrap_or_else(|_| String::from_utf8_lossy(&reply[STATUS_LEN..]).into_owned());
            return Err(Error::Protocol {
                message: format!("{} failed: {}", request, reason),
            });
        }
        Some(Status::Unknown(token)) => {
            return Err(Error::Protocol {
                message: format!(
                    "{}: unexpected status {:?}",
                    request,
                    String::from_utf8_lossy(&token)
                ),
            });
        }
        None => {
            return Err(Error::Protocol {
                message: format!("{}: connection closed before status", request),
            });
        }
    }

    let rest = &reply[STATUS_LEN..];
    match decode_length(rest) {
        Some(len) if rest.len() == LENGTH_PREFIX_LEN + len => Ok(Bytes::copy_from_slice(
            &rest[LENGTH_PREFIX_LEN..],
        )),
        _ => Ok(Bytes::copy_from_slice(rest)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn okay_with_length_prefix() {
        let data = parse_reply(&Request::Version, b"OKAY00040029").unwrap();
        assert_eq!(&data[..], b"0029");
    }

    #[test]
    fn io_failure_becomes_transport() {
        let reset = std::io::Error::from(std::io::ErrorKind::ConnectionReset);
        let err = transport_error(&Request::Version, Error::Io(reset));
        assert!(matches!(err, Error::Transport { .. }), "{err:?}");

        let oversized = Error::Protocol {
            message: "too big".into(),
        };
        assert!(matches!(
            transport_error(&Request::Version, oversized),
            Error::Protocol { .. }
        ));
    }

    #[test]
    fn okay_bare() {
        let data = parse_reply(&Request::Kill, b"OKAY").unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn okay_raw_stream() {
        let data = parse_reply(&Request::Kill, b"OKAYOKAY").unwrap();
        assert_eq!(&data[..], b"OKAY");
    }

    #[test]
    fn fail_carries_reason() {
        let err = parse_reply(&Request::Kill, b"FAIL0007no luck").unwrap_err();
        match err {
            Error::Protocol { message } => assert!(message.contains("no luck"), "{}", message),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_reply_is_protocol_error() {
        assert!(matches!(
            parse_reply(&Request::Version, b""),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn unknown_status_is_protocol_error() {
        assert!(matches!(
            parse_reply(&Request::Version, b"WHAT"),
            Err(Error::Protocol { .. })
        ));
    }
}
