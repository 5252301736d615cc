//! Bridge client configuration.
//!
//! The defaults talk to a server on `127.0.0.1:5037` and locate the server
//! binary through the SDK environment variables and `$PATH`. Hosts override
//! individual fields with the `with_*` builders or load the conventional
//! environment variables with [`BridgeConfig::from_env`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

use crate::constants::{
    DEFAULT_SERVER_PORT, DEFAULT_SOCKET_MARKER, ENV_SERVER_BINARY, ENV_SERVER_PORT,
    ENV_SERVER_SOCKET, RECONCILE_INTERVAL,
};
use crate::error::{Error, Result};

/// Where the bridge server listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BridgeEndpoint {
    /// TCP socket, the default on every platform.
    Tcp(SocketAddr),
    /// Unix-domain socket path.
    Unix(PathBuf),
}

impl Default for BridgeEndpoint {
    fn default() -> Self {
        BridgeEndpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_SERVER_PORT)))
    }
}

impl BridgeEndpoint {
    /// Parse a server socket spec.
    ///
    /// Accepted forms: `tcp:<port>`, `tcp:<host>:<port>` and
    /// `localfilesystem:<path>`.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some(rest) = spec.strip_prefix("tcp:") {
            if let Ok(port) = rest.parse::<u16>() {
                return Ok(BridgeEndpoint::Tcp(SocketAddr::from((
                    Ipv4Addr::LOCALHOST,
                    port,
                ))));
            }
            let addr = rest
                .to_socket_addrs()
                .map_err(|e| Error::Config {
                    message: format!("invalid server address '{}': {}", rest, e),
                })?
                .next()
                .ok_or_else(|| Error::Config {
                    message: format!("server address '{}' did not resolve", rest),
                })?;
            return Ok(BridgeEndpoint::Tcp(addr));
        }

        if let Some(path) = spec.strip_prefix("localfilesystem:") {
            if path.is_empty() {
                return Err(Error::Config {
                    message: "empty server socket path".into(),
                });
            }
            return Ok(BridgeEndpoint::Unix(PathBuf::from(path)));
        }

        Err(Error::Config {
            message: format!("unsupported server socket spec '{}'", spec),
        })
    }

    /// TCP port of the endpoint, if it is a TCP endpoint.
    pub fn port(&self) -> Option<u16> {
        match self {
            BridgeEndpoint::Tcp(addr) => Some(addr.port()),
            BridgeEndpoint::Unix(_) => None,
        }
    }
}

impl fmt::Display for BridgeEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeEndpoint::Tcp(addr) => write!(f, "tcp:{}", addr),
            BridgeEndpoint::Unix(path) => write!(f, "localfilesystem:{}", path.display()),
        }
    }
}

/// Configuration shared by every bridge client component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Server socket.
    pub endpoint: BridgeEndpoint,
    /// Explicit server binary; searched for when `None`.
    pub server_binary: Option<PathBuf>,
    /// Period of the runtime reconciliation loop.
    pub reconcile_interval: Duration,
    /// Substring identifying debugger sockets in a device's socket table.
    pub socket_marker: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: BridgeEndpoint::default(),
            server_binary: None,
            reconcile_interval: RECONCILE_INTERVAL,
            socket_marker: DEFAULT_SOCKET_MARKER.to_string(),
        }
    }
}

impl BridgeConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load overrides through an arbitrary variable lookup.
    ///
    /// `ADB_SERVER_SOCKET` wins over `ANDROID_ADB_SERVER_PORT` when both are set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(port) = lookup(ENV_SERVER_PORT).filter(|v| !v.is_empty()) {
            let port = port.trim().parse::<u16>().map_err(|_| Error::Config {
                message: format!("{} must be a port number, got '{}'", ENV_SERVER_PORT, port),
            })?;
            debug!(port, "server port from {}", ENV_SERVER_PORT);
            config = config.with_port(port);
        }

        if let Some(spec) = lookup(ENV_SERVER_SOCKET).filter(|v| !v.is_empty()) {
            config.endpoint = BridgeEndpoint::parse(spec.trim())?;
            debug!(endpoint = %config.endpoint, "server socket from {}", ENV_SERVER_SOCKET);
        }

        if let Some(binary) = lookup(ENV_SERVER_BINARY).filter(|v| !v.is_empty()) {
            debug!(%binary, "server binary from {}", ENV_SERVER_BINARY);
            config.server_binary = Some(PathBuf::from(binary));
        }

        Ok(config)
    }

    /// Set the server endpoint.
    pub fn with_endpoint(mut self, endpoint: BridgeEndpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Talk to a loopback TCP server on `port`.
    pub fn with_port(mut self, port: u16) -> Self {
        self.endpoint = BridgeEndpoint::Tcp(SocketAddr::from((Ipv4Addr::LOCALHOST, port)));
        self
    }

    /// Use an explicit server binary.
    pub fn with_server_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.server_binary = Some(path.into());
        self
    }

    /// Set the reconciliation period.
    pub fn with_reconcile_interval(mut self, interval: Duration) -> Self {
        self.reconcile_interval = interval;
        self
    }

    /// Set the debugger socket marker.
    pub fn with_socket_marker(mut self, marker: impl Into<String>) -> Self {
        self.socket_marker = marker.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_endpoint_is_loopback_5037() {
        let config = BridgeConfig::default();
        assert_eq!(config.endpoint.to_string(), "tcp:127.0.0.1:5037");
        assert_eq!(config.reconcile_interval, Duration::from_secs(2));
        assert_eq!(config.socket_marker, "debugger-socket");
    }

    #[test]
    fn parse_tcp_port_only() {
        let endpoint = BridgeEndpoint::parse("tcp:6000").unwrap();
        assert_eq!(endpoint.port(), Some(6000));
    }

    #[test]
    fn parse_tcp_host_and_port() {
        let endpoint = BridgeEndpoint::parse("tcp:127.0.0.1:5038").unwrap();
        assert_eq!(
            endpoint,
            BridgeEndpoint::Tcp(SocketAddr::from(([127, 0, 0, 1], 5038)))
        );
    }

    #[test]
    fn parse_unix_path() {
        let endpoint = BridgeEndpoint::parse("localfilesystem:/tmp/adb.sock").unwrap();
        assert_eq!(endpoint, BridgeEndpoint::Unix(PathBuf::from("/tmp/adb.sock")));
        assert_eq!(endpoint.port(), None);
    }

    #[test]
    fn parse_rejects_unknown_scheme() {
        assert!(matches!(
            BridgeEndpoint::parse("localabstract:adb"),
            Err(Error::Config { .. })
        ));
        assert!(BridgeEndpoint::parse("localfilesystem:").is_err());
    }

    #[test]
    fn env_port_override() {
        let config = BridgeConfig::from_lookup(lookup_from(&[("ANDROID_ADB_SERVER_PORT", "5099")]))
            .unwrap();
        assert_eq!(config.endpoint.port(), Some(5099));
    }

    #[test]
    fn env_socket_wins_over_port() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("ANDROID_ADB_SERVER_PORT", "5099"),
            ("ADB_SERVER_SOCKET", "localfilesystem:/run/adb"),
        ]))
        .unwrap();
        assert_eq!(config.endpoint, BridgeEndpoint::Unix(PathBuf::from("/run/adb")));
    }

    #[test]
    fn env_bad_port_is_config_error() {
        let err = BridgeConfig::from_lookup(lookup_from(&[("ANDROID_ADB_SERVER_PORT", "usb")]))
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn env_binary_override() {
        let config =
            BridgeConfig::from_lookup(lookup_from(&[("DBRIDGE_ADB", "/opt/sdk/adb")])).unwrap();
        assert_eq!(config.server_binary, Some(PathBuf::from("/opt/sdk/adb")));
    }

    #[test]
    fn builders_chain() {
        let config = BridgeConfig::new()
            .with_port(7000)
            .with_reconcile_interval(Duration::from_millis(50))
            .with_socket_marker("devtools-socket")
            .with_server_binary("/usr/bin/adb");
        assert_eq!(config.endpoint.port(), Some(7000));
        assert_eq!(config.reconcile_interval, Duration::from_millis(50));
        assert_eq!(config.socket_marker, "devtools-socket");
        assert_eq!(config.server_binary, Some(PathBuf::from("/usr/bin/adb")));
    }
}
