//! dbridge-core: Shared library for the dbridge debug-bridge client.
//!
//! This crate provides:
//! - Request framing and response parsing for the bridge line protocol
//! - Typed request payloads understood by the bridge server
//! - The error taxonomy shared by every client component
//! - Bridge endpoint and polling configuration
//! - Logging setup

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod protocol;

pub use config::{BridgeConfig, BridgeEndpoint};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_logging};
