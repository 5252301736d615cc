//! Remote shell command execution.
//!
//! [`ShellExecutor::run`] opens one socket, selects the device transport,
//! issues `shell:<command>` and collects everything the device prints until
//! the server closes the socket. The protocol steps live in [`machine`].

mod machine;

pub use machine::{ShellEffect, ShellEvent, ShellMachine, ShellState};

use bytes::Bytes;
use tokio::io::AsyncReadExt;
use tracing::debug;

use dbridge_core::{BridgeEndpoint, Error, Result};

use crate::connection::{connect, send_request};

/// Runs shell commands on devices.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    endpoint: BridgeEndpoint,
}

impl ShellExecutor {
    pub fn new(endpoint: BridgeEndpoint) -> Self {
        Self { endpoint }
    }

    /// Run `command` on device `serial` and return its output.
    pub async fn run(&self, serial: &str, command: &str) -> Result<String> {
        if serial.is_empty() {
            return Err(Error::DeviceNotFound(String::new()));
        }

        let mut machine = ShellMachine::new(serial, command);
        let mut stream = connect(&self.endpoint).await?;
        let mut pending = machine.handle(ShellEvent::Opened);
        let mut buf = vec![0u8; 8192];

        loop {
            for effect in pending.drain(..) {
                match effect {
                    ShellEffect::Send(request) => {
                        send_request(&mut stream, &request)
                            .await
                            .map_err(socket_error)?;
                    }
                    ShellEffect::Resolve(output) => {
                        debug!(device = %serial, command, len = output.len(), "shell finished");
                        return Ok(output);
                    }
                    ShellEffect::Reject(err) => {
                        debug!(device = %serial, command, error = %err, "shell failed");
                        return Err(err);
                    }
                    // The socket drops with `stream` on return.
                    ShellEffect::Close => {}
                }
            }

            let event = match stream.read(&mut buf).await {
                Ok(0) => ShellEvent::Closed,
                Ok(n) => ShellEvent::Data(Bytes::copy_from_slice(&buf[..n])),
                Err(e) => ShellEvent::Failed(e.to_string()),
            };
            pending = machine.handle(event);
        }
    }
}

fn socket_error(err: Error) -> Error {
    match err {
        Error::Io(e) => Error::Socket {
            message: e.to_string(),
        },
        other => other,
    }
}
