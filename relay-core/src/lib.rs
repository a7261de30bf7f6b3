//! Core types for the market-data relay
//!
//! This crate defines the shared data structures used across the relay,
//! including stream identifiers, envelopes, the downstream wire protocol
//! and the upstream connection abstraction.

pub mod envelope;
pub mod error;
pub mod format;
pub mod stream;
pub mod ticker;
pub mod upstream;
pub mod websocket;

pub use envelope::Envelope;
pub use error::{RelayError, RelayResult};
pub use format::{format_decimal, format_percent};
pub use stream::{normalize_symbol, Channel, StreamKey};
pub use ticker::TickerSnapshot;
pub use upstream::{ControlFrame, UpstreamConnection, UpstreamConnector, UpstreamEvent};
pub use websocket::{ClientMessage, ConnectionState, ErrorCode, ServerMessage, SocketFrame};
