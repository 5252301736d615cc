//! Port forwarding from a local TCP port to a device socket.

use std::fmt;

use tokio::net::TcpListener;
use tracing::{debug, info};

use dbridge_core::constants::{ABSTRACT_SOCKET_PREFIX, FAIL};
use dbridge_core::protocol::{Request, split_status_payload};
use dbridge_core::{Error, Result};

use crate::command::CommandRunner;

/// Device-side socket a forward points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSocket {
    /// Abstract-namespace socket name, without the `@` marker.
    Abstract(String),
    /// Filesystem socket path.
    Filesystem(String),
}

impl RemoteSocket {
    /// Classify a socket path as reported by the device.
    pub fn parse(path: &str) -> Self {
        match path.strip_prefix(ABSTRACT_SOCKET_PREFIX) {
            Some(name) => RemoteSocket::Abstract(name.to_string()),
            None => RemoteSocket::Filesystem(path.to_string()),
        }
    }
}

impl fmt::Display for RemoteSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteSocket::Abstract(name) => write!(f, "localabstract:{}", name),
            RemoteSocket::Filesystem(path) => write!(f, "localfilesystem:{}", path),
        }
    }
}

/// Pick a free loopback TCP port.
///
/// The port is released before returning, so another process may grab it
/// before the server binds it.
pub async fn allocate_local_port() -> Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Sets up forwards through the bridge server.
#[derive(Debug, Clone)]
pub struct PortForwarder {
    runner: CommandRunner,
}

impl PortForwarder {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Forward a fresh local port to `socket_path` on device `serial`.
    ///
    /// Returns the local port; connect to `127.0.0.1:<port>` to reach the
    /// device socket.
    pub async fn prepare(&self, serial: &str, socket_path: &str) -> Result<u16> {
        let remote = RemoteSocket::parse(socket_path);
        let port = allocate_local_port().await?;
        let request = Request::Forward {
            serial: serial.to_string(),
            local: format!("tcp:{}", port),
            remote: remote.to_string(),
        };
        debug!(device = %serial, port, %remote, "requesting forward");

        let data = self.runner.run(&request).await.map_err(|e| match e {
            Error::Protocol { message } => Error::ForwardRejected { message },
            other => other,
        })?;

        // The forward itself answers with a second status after the host ack.
        if data.starts_with(FAIL) {
            let message = split_status_payload(&data, true)
                .map(|packet| packet.text())
                .unwrap_or_else(|_| String::from_utf8_lossy(&data).into_owned());
            return Err(Error::ForwardRejected { message });
        }

        info!(device = %serial, port, %remote, "Forward established");
        Ok(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abstract_marker_stripped() {
        let remote = RemoteSocket::parse("@debugger-socket");
        assert_eq!(remote, RemoteSocket::Abstract("debugger-socket".into()));
        assert_eq!(remote.to_string(), "localabstract:debugger-socket");
    }

    #[test]
    fn filesystem_path_kept() {
        let remote = RemoteSocket::parse("/data/local/debugger-socket");
        assert_eq!(
            remote,
            RemoteSocket::Filesystem("/data/local/debugger-socket".into())
        );
        assert_eq!(
            remote.to_string(),
            "localfilesystem:/data/local/debugger-socket"
        );
    }

    #[test]
    fn only_leading_marker_is_abstract() {
        let remote = RemoteSocket::parse("/data/@socket");
        assert!(matches!(remote, RemoteSocket::Filesystem(_)));
    }

    #[tokio::test]
    async fn allocated_port_is_nonzero() {
        assert_ne!(allocate_local_port().await.unwrap(), 0);
    }
}
