//! dbridge-test-utils: Test infrastructure for dbridge.
//!
//! Provides:
//! - FakeBridge: In-process bridge server speaking the line protocol over
//!   loopback TCP, with scripted devices, shell output and failures

mod fake_bridge;

pub use fake_bridge::{FakeBridge, ForwardRecord};
