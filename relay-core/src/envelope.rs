//! Normalized upstream message unit

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::StreamKey;

/// One parsed upstream message, fanned out to every consumer attached to
/// its stream key.
///
/// The payload is shared behind an `Arc` so that fan-out to many consumers
/// clones a pointer, not the JSON tree.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub key: StreamKey,
    pub payload: Arc<serde_json::Value>,
    pub received_at: DateTime<Utc>,
}

/// Wire view of an envelope (`{"type":"data",...}`)
#[derive(Serialize)]
struct DataFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    stream: &'a StreamKey,
    data: &'a serde_json::Value,
    received_at: DateTime<Utc>,
}

impl Envelope {
    /// Create an envelope stamped with the current time
    pub fn new(key: StreamKey, payload: serde_json::Value) -> Self {
        Self {
            key,
            payload: Arc::new(payload),
            received_at: Utc::now(),
        }
    }

    /// Serialize as the JSON text frame delivered to downstream clients
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(&DataFrame {
            kind: "data",
            stream: &self.key,
            data: &self.payload,
            received_at: self.received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Channel;
    use serde_json::json;

    #[test]
    fn test_frame_wraps_raw_payload() {
        let key = StreamKey::new("BTCUSDT", Channel::AggTrade).unwrap();
        let envelope = Envelope::new(key, json!({"e": "aggTrade", "p": "64000.10"}));

        let frame: serde_json::Value = serde_json::from_str(&envelope.to_frame().unwrap()).unwrap();
        assert_eq!(frame["type"], "data");
        assert_eq!(frame["stream"], "btcusdt@aggTrade");
        assert_eq!(frame["data"]["p"], "64000.10");
        assert!(frame["received_at"].is_string());
    }
}
