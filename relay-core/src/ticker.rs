//! 24hr ticker snapshot (REST polling path)

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::format::{format_decimal, format_percent};

/// Normalized rolling 24hr ticker for one symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSnapshot {
    pub symbol: String,
    pub last_price: Decimal,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub open_price: Decimal,
    pub high_price: Decimal,
    pub low_price: Decimal,
    pub volume: Decimal,
    pub quote_volume: Decimal,
    pub trade_count: u64,
    pub event_time: DateTime<Utc>,
}

impl TickerSnapshot {
    /// One-line summary for logs, e.g. `BTCUSDT 64000.12 (+2.15%)`
    pub fn summary(&self) -> String {
        format!(
            "{} {} ({})",
            self.symbol,
            format_decimal(self.last_price.to_f64(), 2),
            format_percent(self.price_change_percent.to_f64(), 2)
        )
    }
}
