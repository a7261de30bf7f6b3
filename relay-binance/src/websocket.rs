//! Binance WebSocket connection for real-time market data
//!
//! Connects to the combined-stream endpoint so that a single physical
//! connection carries every stream the relay currently needs. Streams are
//! added and removed with `SUBSCRIBE` / `UNSUBSCRIBE` control frames.

use std::collections::HashMap;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use relay_core::{
    Channel, ControlFrame, Envelope, RelayError, RelayResult, StreamKey, UpstreamConnection,
    UpstreamConnector, UpstreamEvent,
};

use crate::types::{CombinedFrame, ControlMethod, ControlReply, ControlRequest, BINANCE_WS_BASE};

// ============================================================================
// Upstream Target
// ============================================================================

/// Endpoint templating for one upstream feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    base_url: String,
}

impl UpstreamTarget {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Combined-stream endpoint (`<base>/stream`)
    pub fn combined_url(&self) -> String {
        format!("{}/stream", self.base_url)
    }

    /// Single-stream endpoint (`<base>/ws/<symbol>@<channel>`)
    pub fn stream_url(&self, key: &StreamKey) -> String {
        format!("{}/ws/{}", self.base_url, key)
    }
}

impl Default for UpstreamTarget {
    fn default() -> Self {
        Self::new(BINANCE_WS_BASE)
    }
}

// ============================================================================
// Frame Parsing
// ============================================================================

/// Parsed inbound frame
#[derive(Debug, Clone)]
pub enum ParsedFrame {
    Envelope(Envelope),
    Ack { id: u64 },
    Error { id: Option<u64>, code: i64, message: String },
}

/// Parse one inbound text frame
///
/// Accepts combined-stream frames (`{"stream":..,"data":..}`), raw
/// single-stream events (`{"e":..,"s":..}`) and control replies.
pub fn parse_frame(text: &str) -> RelayResult<ParsedFrame> {
    let json: serde_json::Value = serde_json::from_str(text)?;

    if json.get("stream").is_some() && json.get("data").is_some() {
        let frame: CombinedFrame = serde_json::from_value(json)?;
        let key: StreamKey = frame.stream.parse()?;
        return Ok(ParsedFrame::Envelope(Envelope::new(key, frame.data)));
    }

    if json.get("id").is_some() && (json.get("result").is_some() || json.get("error").is_some()) {
        let reply: ControlReply = serde_json::from_value(json)?;
        return match (reply.error, reply.id) {
            (Some(error), id) => Ok(ParsedFrame::Error {
                id,
                code: error.code,
                message: error.msg,
            }),
            (None, Some(id)) => Ok(ParsedFrame::Ack { id }),
            (None, None) => Err(RelayError::parse("control reply without id")),
        };
    }

    // Bare error without an id (e.g. malformed request)
    if let Some(error) = json.get("error") {
        return Ok(ParsedFrame::Error {
            id: None,
            code: error.get("code").and_then(|c| c.as_i64()).unwrap_or_default(),
            message: error
                .get("msg")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    let key = raw_event_key(&json)?;
    Ok(ParsedFrame::Envelope(Envelope::new(key, json)))
}

/// Derive the stream key of a raw single-stream event from its `e` / `s` fields
fn raw_event_key(json: &serde_json::Value) -> RelayResult<StreamKey> {
    let event = json
        .get("e")
        .and_then(|e| e.as_str())
        .ok_or_else(|| RelayError::parse("frame has neither stream nor event type"))?;
    let symbol = json
        .get("s")
        .and_then(|s| s.as_str())
        .ok_or_else(|| RelayError::parse(format!("{} event without symbol", event)))?;

    let channel = match event {
        "aggTrade" => Channel::AggTrade,
        "trade" => Channel::Trade,
        "24hrTicker" => Channel::Ticker,
        "24hrMiniTicker" => Channel::MiniTicker,
        "depthUpdate" => Channel::Depth {
            levels: None,
            fast: false,
        },
        "kline" => {
            let interval = json
                .get("k")
                .and_then(|k| k.get("i"))
                .and_then(|i| i.as_str())
                .ok_or_else(|| RelayError::parse("kline event without interval"))?;
            Channel::kline(interval)?
        }
        other => return Err(RelayError::parse(format!("unknown event type '{}'", other))),
    };

    StreamKey::new(symbol, channel)
}

// ============================================================================
// Connector / Connection
// ============================================================================

/// Opens combined-stream connections to Binance
#[derive(Debug, Clone, Default)]
pub struct BinanceConnector {
    target: UpstreamTarget,
}

impl BinanceConnector {
    pub fn new(target: UpstreamTarget) -> Self {
        Self { target }
    }
}

#[async_trait]
impl UpstreamConnector for BinanceConnector {
    type Connection = BinanceConnection;

    fn target(&self) -> String {
        self.target.combined_url()
    }

    async fn connect(&self) -> RelayResult<BinanceConnection> {
        let url = self.target.combined_url();
        info!("[Upstream] Connecting to {}", url);

        let (ws, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::transport(format!("connect to {} failed: {}", url, e)))?;

        info!("[Upstream] Connected successfully");
        Ok(BinanceConnection::new(ws))
    }
}

/// One live combined-stream connection
pub struct BinanceConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    next_id: u64,
    /// Streams carried by each in-flight control frame, for error reporting
    pending: HashMap<u64, Vec<StreamKey>>,
}

impl BinanceConnection {
    fn new(ws: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self {
            ws,
            next_id: 1,
            pending: HashMap::new(),
        }
    }
}

#[async_trait]
impl UpstreamConnection for BinanceConnection {
    async fn send(&mut self, frame: ControlFrame) -> RelayResult<()> {
        let method = match frame {
            ControlFrame::Subscribe(_) => ControlMethod::Subscribe,
            ControlFrame::Unsubscribe(_) => ControlMethod::Unsubscribe,
        };
        let id = self.next_id;
        self.next_id += 1;

        let request = ControlRequest {
            method,
            params: frame.keys().iter().map(StreamKey::stream_name).collect(),
            id,
        };
        let json = serde_json::to_string(&request)?;
        debug!("[Upstream] Sending control frame: {}", json);

        self.pending.insert(id, frame.keys().to_vec());
        self.ws
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| RelayError::transport(format!("send failed: {}", e)))
    }

    async fn recv(&mut self) -> RelayResult<UpstreamEvent> {
        loop {
            let msg = match self.ws.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(RelayError::transport(e.to_string())),
                None => return Ok(UpstreamEvent::Closed { reason: None }),
            };

            match msg {
                Message::Text(text) => match parse_frame(text.as_str()) {
                    Ok(ParsedFrame::Envelope(envelope)) => {
                        return Ok(UpstreamEvent::Envelope(envelope));
                    }
                    Ok(ParsedFrame::Ack { id }) => {
                        self.pending.remove(&id);
                        return Ok(UpstreamEvent::Ack { id });
                    }
                    Ok(ParsedFrame::Error { id, code, message }) => {
                        let streams = id
                            .and_then(|id| self.pending.remove(&id))
                            .unwrap_or_default();
                        return Ok(UpstreamEvent::Rejected {
                            streams,
                            message: format!("{} (code {})", message, code),
                        });
                    }
                    Err(e) => {
                        warn!("[Upstream] Dropping unparseable frame: {}", e);
                        debug!("[Upstream] Frame: {}", text.as_str());
                    }
                },
                Message::Ping(data) => {
                    self.ws
                        .send(Message::Pong(data))
                        .await
                        .map_err(|e| RelayError::transport(format!("pong failed: {}", e)))?;
                }
                Message::Pong(_) => return Ok(UpstreamEvent::Pong),
                Message::Close(frame) => {
                    let reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                    info!("[Upstream] Connection closed by server: {:?}", reason);
                    return Ok(UpstreamEvent::Closed { reason });
                }
                Message::Binary(_) | Message::Frame(_) => {
                    debug!("[Upstream] Ignoring non-text frame");
                }
            }
        }
    }

    async fn ping(&mut self) -> RelayResult<()> {
        self.ws
            .send(Message::Ping(Vec::new().into()))
            .await
            .map_err(|e| RelayError::transport(format!("ping failed: {}", e)))
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("[Upstream] Close failed: {}", e);
        }
    }
}

impl std::fmt::Debug for BinanceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceConnection")
            .field("next_id", &self.next_id)
            .field("pending", &self.pending.len())
            .finish()
    }
}
