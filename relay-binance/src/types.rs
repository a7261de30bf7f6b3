//! Binance wire types
//!
//! Raw shapes of the frames and REST responses exchanged with Binance.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use relay_core::TickerSnapshot;

/// Public market-data stream endpoint
pub const BINANCE_WS_BASE: &str = "wss://stream.binance.com:9443";

/// Public REST endpoint
pub const BINANCE_REST_BASE: &str = "https://api.binance.com";

// ============================================================================
// WebSocket Control Frames
// ============================================================================

/// `SUBSCRIBE` / `UNSUBSCRIBE` request
#[derive(Debug, Clone, Serialize)]
pub struct ControlRequest {
    pub method: ControlMethod,
    pub params: Vec<String>,
    pub id: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlMethod {
    Subscribe,
    Unsubscribe,
}

// ============================================================================
// WebSocket Inbound Frames
// ============================================================================

/// Frame received on the combined stream endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedFrame {
    pub stream: String,
    pub data: serde_json::Value,
}

/// Reply to a control request
#[derive(Debug, Clone, Deserialize)]
pub struct ControlReply {
    pub id: Option<u64>,
    #[serde(default)]
    pub error: Option<ControlError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControlError {
    pub code: i64,
    pub msg: String,
}

// ============================================================================
// REST Responses
// ============================================================================

/// `GET /api/v3/ticker/24hr?symbol=...`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker24hrResponse {
    pub symbol: String,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub last_price: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    /// Close time of the rolling window, epoch millis
    pub close_time: i64,
    pub count: u64,
}

impl From<Ticker24hrResponse> for TickerSnapshot {
    fn from(raw: Ticker24hrResponse) -> Self {
        let event_time = DateTime::<Utc>::from_timestamp_millis(raw.close_time).unwrap_or_else(Utc::now);

        TickerSnapshot {
            symbol: raw.symbol,
            last_price: raw.last_price,
            price_change: raw.price_change,
            price_change_percent: raw.price_change_percent,
            open_price: raw.open_price,
            high_price: raw.high_price,
            low_price: raw.low_price,
            volume: raw.volume,
            quote_volume: raw.quote_volume,
            trade_count: raw.count,
            event_time,
        }
    }
}

/// Error body returned by the REST API
#[derive(Debug, Clone, Deserialize)]
pub struct RestError {
    pub code: i64,
    pub msg: String,
}
