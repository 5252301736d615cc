//! Bridge server process lifecycle.
//!
//! [`ServerProcess`] starts the server binary when no server answers on the
//! configured endpoint and remembers whether it did so. Only an instance that
//! launched the server will ever send `host:kill` on [`ServerProcess::stop`].

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::process::Command;
use tracing::{debug, info, warn};

use dbridge_core::constants::{ENV_SERVER_PORT, ENV_SERVER_SOCKET, START_SERVER_ARG};
use dbridge_core::protocol::Request;
use dbridge_core::{BridgeConfig, BridgeEndpoint, Error, Result};

use crate::binary::locate_server_binary;
use crate::command::CommandRunner;

/// Result of [`ServerProcess::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartOutcome {
    /// A live server was found, nothing was launched.
    pub already_running: bool,
}

/// Owner of the local bridge server process.
#[derive(Debug)]
pub struct ServerProcess {
    config: BridgeConfig,
    runner: CommandRunner,
    ready: AtomicBool,
    originated: AtomicBool,
}

impl ServerProcess {
    pub fn new(config: BridgeConfig) -> Self {
        let runner = CommandRunner::new(config.endpoint.clone());
        Self {
            config,
            runner,
            ready: AtomicBool::new(false),
            originated: AtomicBool::new(false),
        }
    }

    /// Whether the server was started (or found) and not since killed.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Whether this instance launched the running server.
    pub fn started_by_us(&self) -> bool {
        self.originated.load(Ordering::SeqCst)
    }

    /// Probe the endpoint with `host:version`.
    pub async fn is_running(&self) -> bool {
        match self.server_version().await {
            Ok(version) => {
                debug!(version, "bridge server answered");
                true
            }
            Err(e) => {
                debug!(error = %e, "bridge server probe failed");
                false
            }
        }
    }

    /// Protocol version reported by the server.
    pub async fn server_version(&self) -> Result<u32> {
        let data = self.runner.run(&Request::Version).await?;
        let text = String::from_utf8_lossy(&data);
        u32::from_str_radix(text.trim(), 16).map_err(|_| Error::Protocol {
            message: format!("unparseable server version {:?}", text),
        })
    }

    /// Make sure a server is running, launching one if needed.
    pub async fn start(&self) -> Result<StartOutcome> {
        if self.is_running().await {
            self.ready.store(true, Ordering::SeqCst);
            return Ok(StartOutcome {
                already_running: true,
            });
        }

        let binary = locate_server_binary(&self.config)?;
        info!(binary = %binary.display(), endpoint = %self.config.endpoint, "Starting bridge server");

        let mut cmd = Command::new(&binary);
        cmd.arg(START_SERVER_ARG)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        match &self.config.endpoint {
            BridgeEndpoint::Tcp(addr) => {
                cmd.env(ENV_SERVER_PORT, addr.port().to_string());
            }
            endpoint @ BridgeEndpoint::Unix(_) => {
                cmd.env(ENV_SERVER_SOCKET, endpoint.to_string());
            }
        }

        let status = cmd.status().await.map_err(|e| Error::ProcessLaunchFailed {
            message: format!("failed to spawn {}: {}", binary.display(), e),
        })?;
        if !status.success() {
            return Err(Error::ProcessLaunchFailed {
                message: format!("{} {} exited with {}", binary.display(), START_SERVER_ARG, status),
            });
        }

        self.originated.store(true, Ordering::SeqCst);
        self.ready.store(true, Ordering::SeqCst);
        info!("Bridge server started");
        Ok(StartOutcome {
            already_running: false,
        })
    }

    /// Stop the server if this instance launched it; otherwise do nothing.
    pub async fn stop(&self) -> Result<()> {
        if !self.started_by_us() {
            debug!("not stopping a server we did not start");
            return Ok(());
        }
        self.kill().await
    }

    /// Send `host:kill` unconditionally.
    ///
    /// Both flags are cleared whether or not the request succeeds.
    pub async fn kill(&self) -> Result<()> {
        let result = self.runner.run(&Request::Kill).await;
        self.ready.store(false, Ordering::SeqCst);
        self.originated.store(false, Ordering::SeqCst);
        match result {
            Ok(_) => {
                info!("Bridge server stopped");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "host:kill failed");
                Err(e)
            }
        }
    }
}
