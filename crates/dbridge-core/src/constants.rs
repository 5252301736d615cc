//! Protocol and configuration constants for dbridge.

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Acknowledgment token sent by the bridge server on success.
pub const OKAY: &[u8; 4] = b"OKAY";

/// Rejection token sent by the bridge server on failure.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Width of a response status token in bytes.
pub const STATUS_LEN: usize = 4;

/// Width of the hexadecimal length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest payload a 4-hex-digit length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = 0xFFFF;

/// Upper bound on a one-shot command response we are willing to buffer (1 MiB).
pub const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

/// Device status reported by the tracking stream for an unreachable device.
pub const STATUS_OFFLINE: &str = "offline";

/// Device status reported by the tracking stream for an online device.
pub const STATUS_DEVICE: &str = "device";

// =============================================================================
// Server Constants
// =============================================================================

/// Default TCP port of the bridge server.
pub const DEFAULT_SERVER_PORT: u16 = 5037;

/// Argument asking the server binary to daemonize and return.
pub const START_SERVER_ARG: &str = "start-server";

/// File name of the server binary on this platform.
#[cfg(windows)]
pub const SERVER_BINARY_NAME: &str = "adb.exe";

/// File name of the server binary on this platform.
#[cfg(not(windows))]
pub const SERVER_BINARY_NAME: &str = "adb";

/// Environment variable overriding the server port.
pub const ENV_SERVER_PORT: &str = "ANDROID_ADB_SERVER_PORT";

/// Environment variable overriding the server socket (`tcp:...` or `localfilesystem:...`).
pub const ENV_SERVER_SOCKET: &str = "ADB_SERVER_SOCKET";

/// Environment variable naming an explicit server binary.
pub const ENV_SERVER_BINARY: &str = "DBRIDGE_ADB";

/// SDK roots searched for `platform-tools/<binary>`.
pub const SDK_ROOT_VARS: &[&str] = &["ANDROID_HOME", "ANDROID_SDK_ROOT"];

// =============================================================================
// Discovery Constants
// =============================================================================

/// Substring identifying debugger sockets in the device's Unix socket table.
pub const DEFAULT_SOCKET_MARKER: &str = "debugger-socket";

/// Shell command returning the device's model name.
pub const MODEL_QUERY: &str = "getprop ro.product.model";

/// Prefix marking an abstract-namespace socket path.
pub const ABSTRACT_SOCKET_PREFIX: char = '@';

// =============================================================================
// Timing Constants
// =============================================================================

/// Period of the runtime reconciliation loop.
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(2);
