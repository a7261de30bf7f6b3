//! Stream identifiers
//!
//! A [`StreamKey`] names one logical exchange feed: a trading symbol plus a
//! channel. Its canonical text form follows the exchange convention
//! `<symbol-lowercase>@<channel>`, e.g. `btcusdt@aggTrade` or
//! `ethusdt@kline_1m`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smol_str::SmolStr;

use crate::{RelayError, RelayResult};

/// Longest symbol accepted (exchange symbols are well below this)
const MAX_SYMBOL_LEN: usize = 20;

/// Kline intervals published by the exchange. Case matters: `1m` is one
/// minute, `1M` is one month.
pub const KLINE_INTERVALS: &[&str] = &[
    "1s", "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w",
    "1M",
];

/// Partial book depth levels published by the exchange
const DEPTH_LEVELS: &[u8] = &[5, 10, 20];

/// Channel of a market-data stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Aggregated trades
    AggTrade,
    /// Raw trades
    Trade,
    /// Rolling 24hr ticker
    Ticker,
    /// Rolling 24hr mini ticker
    MiniTicker,
    /// Best bid/ask updates
    BookTicker,
    /// Candlesticks for an interval
    Kline(SmolStr),
    /// Order book depth; `levels` set for partial book snapshots,
    /// `fast` selects the 100ms update speed
    Depth { levels: Option<u8>, fast: bool },
}

impl Channel {
    /// Build a kline channel, validating the interval
    pub fn kline(interval: &str) -> RelayResult<Self> {
        if KLINE_INTERVALS.contains(&interval) {
            Ok(Channel::Kline(SmolStr::new(interval)))
        } else {
            Err(RelayError::invalid_stream(format!(
                "unknown kline interval '{}'",
                interval
            )))
        }
    }

    /// Interval suffix used by kline channels (`kline_<interval>`)
    pub fn interval(&self) -> Option<&str> {
        match self {
            Channel::Kline(interval) => Some(interval.as_str()),
            _ => None,
        }
    }

    fn parse_depth(rest: &str) -> RelayResult<Self> {
        let (levels_part, fast) = match rest.split_once('@') {
            Some((levels, speed)) if speed.eq_ignore_ascii_case("100ms") => (levels, true),
            Some((_, speed)) => {
                return Err(RelayError::invalid_stream(format!(
                    "unknown depth update speed '{}'",
                    speed
                )))
            }
            None => (rest, false),
        };

        let levels = if levels_part.is_empty() {
            None
        } else {
            let levels: u8 = levels_part.parse().map_err(|_| {
                RelayError::invalid_stream(format!("invalid depth levels '{}'", levels_part))
            })?;
            if !DEPTH_LEVELS.contains(&levels) {
                return Err(RelayError::invalid_stream(format!(
                    "unsupported depth levels {}",
                    levels
                )));
            }
            Some(levels)
        };

        Ok(Channel::Depth { levels, fast })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::AggTrade => f.write_str("aggTrade"),
            Channel::Trade => f.write_str("trade"),
            Channel::Ticker => f.write_str("ticker"),
            Channel::MiniTicker => f.write_str("miniTicker"),
            Channel::BookTicker => f.write_str("bookTicker"),
            Channel::Kline(interval) => write!(f, "kline_{}", interval),
            Channel::Depth { levels, fast } => {
                f.write_str("depth")?;
                if let Some(levels) = levels {
                    write!(f, "{}", levels)?;
                }
                if *fast {
                    f.write_str("@100ms")?;
                }
                Ok(())
            }
        }
    }
}

impl FromStr for Channel {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Interval keeps its case; only the channel name is case-insensitive
        if let Some(interval) = s
            .get(..6)
            .filter(|prefix| prefix.eq_ignore_ascii_case("kline_"))
            .map(|_| &s[6..])
        {
            return Channel::kline(interval);
        }

        let lower = s.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("depth") {
            return Channel::parse_depth(rest);
        }

        match lower.as_str() {
            "aggtrade" => Ok(Channel::AggTrade),
            "trade" => Ok(Channel::Trade),
            "ticker" => Ok(Channel::Ticker),
            "miniticker" => Ok(Channel::MiniTicker),
            "bookticker" => Ok(Channel::BookTicker),
            _ => Err(RelayError::invalid_stream(format!("unknown channel '{}'", s))),
        }
    }
}

/// Identifier for one logical exchange data feed (symbol + channel)
///
/// Symbols are stored upper-case so that `BTCUSDT@aggTrade` and
/// `btcusdt@aggtrade` are the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamKey {
    symbol: SmolStr,
    channel: Channel,
}

impl StreamKey {
    /// Create a key, normalising and validating the symbol
    pub fn new(symbol: &str, channel: Channel) -> RelayResult<Self> {
        Ok(Self {
            symbol: normalize_symbol(symbol)?,
            channel,
        })
    }

    /// Upper-case trading symbol, e.g. `BTCUSDT`
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Canonical stream name as used in exchange control frames
    pub fn stream_name(&self) -> String {
        self.to_string()
    }
}

/// Validate a trading symbol and return its upper-case form
pub fn normalize_symbol(symbol: &str) -> RelayResult<SmolStr> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err(RelayError::invalid_stream("symbol is empty"));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(RelayError::invalid_stream(format!(
            "symbol '{}' is too long",
            symbol
        )));
    }
    if !symbol.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RelayError::invalid_stream(format!(
            "symbol '{}' contains invalid characters",
            symbol
        )));
    }
    Ok(SmolStr::new(symbol.to_ascii_uppercase()))
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol.to_ascii_lowercase(), self.channel)
    }
}

impl FromStr for StreamKey {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (symbol, channel) = s
            .trim()
            .split_once('@')
            .ok_or_else(|| RelayError::invalid_stream(format!("'{}' is not <symbol>@<channel>", s)))?;
        StreamKey::new(symbol, channel.parse()?)
    }
}

impl Serialize for StreamKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for StreamKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
