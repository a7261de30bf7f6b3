//! Binance integration for the market-data relay
//!
//! Provides the combined-stream WebSocket connection used as the relay's
//! upstream feed, and a REST client for 24hr ticker snapshots.
//!
//! Both speak only to public endpoints; no credentials are needed.

pub mod client;
pub mod types;
pub mod websocket;

pub use client::BinanceRestClient;
pub use types::{BINANCE_REST_BASE, BINANCE_WS_BASE};
pub use websocket::{parse_frame, BinanceConnection, BinanceConnector, ParsedFrame, UpstreamTarget};
