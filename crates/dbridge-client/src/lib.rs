//! dbridge-client: Client library for the debug-bridge server.
//!
//! Provides:
//! - Server process lifecycle (detect, start, stop only what we started)
//! - One-shot host commands
//! - Shell execution as an explicit state machine
//! - Port forwarding to device sockets
//! - Live device tracking with online/offline diffing
//! - A device registry and the polling-refreshed runtime directory
//! - CLI argument parsing for the `dbridge` binary

pub mod binary;
pub mod cli;
pub mod command;
pub mod connection;
pub mod directory;
pub mod discovery;
pub mod forward;
pub mod registry;
pub mod server;
pub mod shell;
pub mod tracker;

pub use binary::locate_server_binary;
pub use cli::{Cli, CliLogFormat};
pub use command::CommandRunner;
pub use directory::{ListenerId, RuntimeDirectory, RuntimeListener};
pub use forward::{PortForwarder, RemoteSocket, allocate_local_port};
pub use registry::{Device, DeviceRegistry, Runtime, RuntimeKind, parse_socket_table};
pub use server::{ServerProcess, StartOutcome};
pub use shell::{ShellExecutor, ShellMachine};
pub use tracker::{DeviceChange, DeviceSnapshot, DeviceTracker};
