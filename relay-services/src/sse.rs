//! Server-sent-events bridge
//!
//! One-shot, server-driven stream for clients that cannot hold a duplex
//! socket. The first item is always the `connected` acknowledgement, then
//! one serialized envelope per item. Items are bare JSON strings; the HTTP
//! layer wraps them as `data:` events.
//!
//! The consumer lives inside the returned stream, so dropping the stream
//! (client abort) detaches it. The stream ends on hub shutdown.

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use tracing::{error, info};

use relay_core::{Channel, RelayError, RelayResult, ServerMessage, StreamKey};

use crate::consumer::TransportKind;
use crate::hub::RelayHub;

/// Query string accepted by the SSE endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamQuery {
    pub symbol: Option<String>,
    pub stream: Option<String>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Forward envelopes from the shared upstream connection
    Live,
    /// Poll the REST API and synthesize envelopes
    Poll,
}

/// Resolved SSE request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub key: StreamKey,
    /// Value of `stream` in the acknowledgement event
    pub ack_stream: String,
    pub mode: StreamMode,
}

impl StreamRequest {
    /// Resolve a query: `?stream=<name>` wins over `?symbol=<SYMBOL>`, which
    /// maps to the symbol's ticker stream
    pub fn from_query(query: &StreamQuery) -> RelayResult<Self> {
        let mode = match query.mode.as_deref().map(str::trim) {
            None | Some("") | Some("live") => StreamMode::Live,
            Some("poll") => StreamMode::Poll,
            Some(other) => {
                return Err(RelayError::invalid_stream(format!("unknown mode '{}'", other)))
            }
        };

        let (key, ack_stream) = match (query.stream.as_deref(), query.symbol.as_deref()) {
            (Some(stream), _) => {
                let key: StreamKey = stream.parse()?;
                let ack = key.to_string();
                (key, ack)
            }
            (None, Some(symbol)) => {
                let key = StreamKey::new(symbol, Channel::Ticker)?;
                let ack = key.symbol().to_ascii_lowercase();
                (key, ack)
            }
            (None, None) => {
                return Err(RelayError::invalid_stream(
                    "either 'symbol' or 'stream' is required",
                ))
            }
        };

        if mode == StreamMode::Poll && *key.channel() != Channel::Ticker {
            return Err(RelayError::invalid_stream(format!(
                "polling only supports ticker streams, got '{}'",
                key
            )));
        }

        Ok(Self {
            key,
            ack_stream,
            mode,
        })
    }
}

/// Acknowledgement sent as the first event of every SSE stream
pub fn ack_event(stream: &str) -> String {
    serde_json::to_string(&ServerMessage::Connected {
        stream: stream.to_string(),
    })
    .unwrap_or_default()
}

/// Attach to the request's stream and return its event stream
pub fn live_events(hub: &RelayHub, request: &StreamRequest) -> BoxStream<'static, String> {
    let mut consumer = hub.open_consumer(TransportKind::Sse);
    let subscription = consumer.subscribe(request.key.clone());
    info!(
        "[SSE] {} streaming {} (refs: {})",
        consumer.id(),
        request.key,
        subscription.ref_count
    );

    let ack = stream::once(std::future::ready(ack_event(&request.ack_stream)));
    let envelopes = stream::unfold(consumer, |mut consumer| async move {
        loop {
            let envelope = consumer.recv().await?;
            match envelope.to_frame() {
                Ok(json) => return Some((json, consumer)),
                Err(e) => error!("[SSE] Failed to serialize envelope: {}", e),
            }
        }
    });

    ack.chain(envelopes)
        .take_until(hub.shutdown_signal())
        .boxed()
}
