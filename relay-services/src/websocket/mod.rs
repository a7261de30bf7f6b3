//! Live-socket downstream transport
//!
//! Clients hold one duplex connection and manage their own stream set with
//! subscribe/unsubscribe control messages.

mod handler;

pub use handler::{LiveSocketBridge, LiveSocketConfig};
