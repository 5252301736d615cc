//! Command-line interface of the `dbridge` binary.
//!
//! Provides command-line argument parsing using clap.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use dbridge_core::{BridgeConfig, Result};

/// Log output format for CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum CliLogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

impl From<CliLogFormat> for dbridge_core::LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => dbridge_core::LogFormat::Text,
            CliLogFormat::Json => dbridge_core::LogFormat::Json,
        }
    }
}

/// Debug-bridge client.
#[derive(Debug, Parser)]
#[command(name = "dbridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log to file instead of stderr
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log output format
    #[arg(long = "log-format", default_value = "text", global = true)]
    pub log_format: CliLogFormat,

    /// Bridge server port (overrides ANDROID_ADB_SERVER_PORT)
    #[arg(short = 'P', long, global = true)]
    pub port: Option<u16>,

    /// Bridge server binary (overrides DBRIDGE_ADB and the SDK/PATH search)
    #[arg(long = "adb", value_name = "PATH", global = true)]
    pub adb: Option<PathBuf>,

    /// Reconciliation interval in milliseconds
    #[arg(long = "interval-ms", value_name = "MS", global = true)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// List debuggable runtimes on attached devices
    Devices {
        /// Keep running and print every update
        #[arg(short = 'w', long)]
        watch: bool,

        /// Print runtimes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run a shell command on a device
    Shell {
        /// Device id
        device: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true, num_args = 1..)]
        command: Vec<String>,
    },

    /// Forward a fresh local port to a device socket
    Forward {
        /// Device id
        device: String,

        /// Device socket path; a leading '@' names an abstract socket
        socket: String,
    },

    /// Stop the bridge server
    KillServer,
}

impl Cli {
    /// Build the client configuration: environment first, then flags.
    pub fn bridge_config(&self) -> Result<BridgeConfig> {
        let mut config = BridgeConfig::from_env()?;
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(adb) = &self.adb {
            config = config.with_server_binary(adb);
        }
        if let Some(ms) = self.interval_ms {
            config = config.with_reconcile_interval(Duration::from_millis(ms.max(1)));
        }
        Ok(config)
    }
}
