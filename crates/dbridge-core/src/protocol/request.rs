//! Request payloads understood by the bridge server.

use std::fmt;

use bytes::Bytes;

use super::codec::encode_request;
use crate::error::Result;

/// A request sent to the bridge server, rendered to its payload string by
/// [`Request::payload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `host:version`: report the server's protocol version.
    Version,
    /// `host:track-devices`: stream the device list on every change.
    TrackDevices,
    /// `host:transport:<serial>`: scope the connection to one device.
    Transport { serial: String },
    /// `shell:<command>`: run a command on the selected device.
    Shell { command: String },
    /// `host-serial:<serial>:forward:<local>;<remote>`: forward a local port.
    Forward {
        serial: String,
        local: String,
        remote: String,
    },
    /// `host:kill`: terminate the server.
    Kill,
}

impl Request {
    /// Payload string carried after the length prefix.
    pub fn payload(&self) -> String {
        match self {
            Request::Version => "host:version".to_string(),
            Request::TrackDevices => "host:track-devices".to_string(),
            Request::Transport { serial } => format!("host:transport:{}", serial),
            Request::Shell { command } => format!("shell:{}", command),
            Request::Forward {
                serial,
                local,
                remote,
            } => format!("host-serial:{}:forward:{};{}", serial, local, remote),
            Request::Kill => "host:kill".to_string(),
        }
    }

    /// Encode as a complete request frame.
    pub fn encode(&self) -> Result<Bytes> {
        encode_request(&self.payload())
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.payload())
    }
}
