//! Error types for dbridge.

use thiserror::Error;

/// Main error type for dbridge operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from underlying system calls.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No bridge server binary could be located.
    #[error("bridge server binary not found: {message}")]
    BinaryNotFound { message: String },

    /// The bridge server binary failed to launch or exited unsuccessfully.
    #[error("failed to launch bridge server: {message}")]
    ProcessLaunchFailed { message: String },

    /// Could not reach the bridge server.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A socket failed in the middle of a multi-step exchange.
    #[error("socket error: {message}")]
    Socket { message: String },

    /// The server answered without an acknowledgment.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A step of a multi-step exchange was not acknowledged.
    #[error("bad response: {message}")]
    BadResponse { message: String },

    /// A state machine received an event it has no transition for.
    #[error("unexpected state: {state}")]
    UnexpectedState { state: String },

    /// The server refused to set up a port forward.
    #[error("forward rejected: {message}")]
    ForwardRejected { message: String },

    /// The referenced device or runtime is no longer known.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Frame encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec { message: String },

    /// Invalid configuration value.
    #[error("invalid configuration: {message}")]
    Config { message: String },
}

impl Error {
    /// Returns true if this error is a connectivity failure that a later
    /// reconciliation pass may get past.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transport { .. } | Error::Socket { .. } | Error::Io(_)
        )
    }

    /// Returns true if the peer violated the wire protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::Protocol { .. }
                | Error::BadResponse { .. }
                | Error::UnexpectedState { .. }
                | Error::Codec { .. }
        )
    }
}

/// Convenience result type for dbridge operations.
pub type Result<T> = std::result::Result<T, Error>;
