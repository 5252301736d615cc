//! Tracing integration for structured logging.
//!
//! The CLI and any embedding host call [`init_logging`] once at startup.
//! `RUST_LOG` takes precedence over the verbosity-derived filter.

use std::fs::File;
use std::path::Path;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// Structured JSON output.
    Json,
}

/// Map a `-v` count to a tracing level name.
///
/// 0=error, 1=warn, 2=info, 3=debug, 4+=trace.
pub fn level_for_verbosity(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// # Arguments
///
/// * `verbosity` - Verbosity level (see [`level_for_verbosity`])
/// * `log_file` - Optional path to append logs to instead of stderr
/// * `format` - Output format (text or JSON)
pub fn init_logging(verbosity: u8, log_file: Option<&Path>, format: LogFormat) -> Result<()> {
    let level = level_for_verbosity(verbosity);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "dbridge={level},dbridge_core={level},dbridge_client={level}"
        ))
    });
    let detailed = verbosity >= 3;

    let registry = tracing_subscriber::registry().with(filter);
    match (log_file.map(open_log_file).transpose()?, format) {
        (None, LogFormat::Text) => registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_file(detailed)
                    .with_line_number(detailed),
            )
            .try_init()
            .map_err(init_failed),
        (None, LogFormat::Json) => registry
            .with(fmt::layer().json())
            .try_init()
            .map_err(init_failed),
        (Some(file), LogFormat::Text) => registry
            .with(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_target(true)
                    .with_file(detailed)
                    .with_line_number(detailed),
            )
            .try_init()
            .map_err(init_failed),
        (Some(file), LogFormat::Json) => registry
            .with(fmt::layer().json().with_writer(file))
            .try_init()
            .map_err(init_failed),
    }
}

/// Initialize logging with defaults for testing.
///
/// Silently ignores errors (a subscriber may already be installed).
pub fn init_test_logging() {
    let _ = init_logging(2, None, LogFormat::Text);
}

fn open_log_file(path: &Path) -> Result<File> {
    Ok(std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?)
}

fn init_failed(err: impl std::fmt::Display) -> Error {
    Error::Config {
        message: format!("failed to install log subscriber: {err}"),
    }
}
