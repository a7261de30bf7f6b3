//! Live-socket connection handler
//!
//! Drives one downstream WebSocket client: parses its subscribe/unsubscribe
//! requests, forwards envelopes for the streams it holds, pings it and
//! reports upstream state changes. The transport itself is abstracted as a
//! stream of inbound [`SocketFrame`]s and a channel of outbound ones, so the
//! same handler runs behind axum or inside tests.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use relay_core::{ClientMessage, ErrorCode, ServerMessage, SocketFrame, StreamKey};

use crate::config::RelayConfig;
use crate::consumer::{Consumer, TransportKind};
use crate::hub::RelayHub;

/// Heartbeat settings for downstream sockets
#[derive(Debug, Clone, Copy)]
pub struct LiveSocketConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
}

impl From<&RelayConfig> for LiveSocketConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            ping_interval: config.client_ping_interval,
            pong_timeout: config.client_pong_timeout,
        }
    }
}

impl Default for LiveSocketConfig {
    fn default() -> Self {
        Self::from(&RelayConfig::default())
    }
}

/// Shared state for live-socket handlers
#[derive(Clone)]
pub struct LiveSocketBridge {
    hub: Arc<RelayHub>,
    config: LiveSocketConfig,
}

impl LiveSocketBridge {
    pub fn new(hub: Arc<RelayHub>, config: LiveSocketConfig) -> Self {
        Self { hub, config }
    }

    /// Handle a connected client until it goes away
    ///
    /// Returns once the client closes, misses a pong, stops reading for
    /// longer than the pong timeout, or the hub shuts down. The consumer is
    /// dropped on return, detaching all its streams.
    pub async fn handle_connection<S>(&self, mut inbound: S, outbound: mpsc::Sender<SocketFrame>)
    where
        S: Stream<Item = SocketFrame> + Unpin + Send,
    {
        let mut consumer = self.hub.open_consumer(TransportKind::LiveSocket);
        let id = consumer.id();
        info!("[LiveSocket] New connection: {}", id);

        // A client that stops reading is as dead as one that stops ponging
        let writer = Writer {
            outbound: &outbound,
            deadline: self.config.pong_timeout,
        };

        let mut state_rx = self.hub.watch_state();
        let mut watching_state = true;
        let current = *state_rx.borrow_and_update();
        let shutdown = self.hub.shutdown_signal();
        tokio::pin!(shutdown);

        let period = self.config.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut pong_deadline: Option<Instant> = None;

        let reason = match writer.message(&ServerMessage::ConnectionStatus { state: current }).await {
            Err(reason) => reason,
            Ok(()) => loop {
                let written = tokio::select! {
                    frame = inbound.next() => match frame {
                        Some(SocketFrame::Text(text)) => {
                            writer.message(&handle_text(&mut consumer, &text)).await
                        }
                        Some(SocketFrame::Binary(_)) => {
                            writer
                                .message(&ServerMessage::error(
                                    ErrorCode::InvalidMessage,
                                    "Binary messages not supported",
                                ))
                                .await
                        }
                        Some(SocketFrame::Ping(_)) => {
                            // Answered by the transport
                            debug!("[LiveSocket] Received ping from {}", id);
                            Ok(())
                        }
                        Some(SocketFrame::Pong(_)) => {
                            pong_deadline = None;
                            Ok(())
                        }
                        Some(SocketFrame::Close) | None => break "closed by client",
                    },
                    envelope = consumer.recv() => match envelope {
                        Some(envelope) => match envelope.to_frame() {
                            Ok(json) => writer.frame(SocketFrame::Text(json)).await,
                            Err(e) => {
                                error!("[LiveSocket] Failed to serialize envelope: {}", e);
                                writer
                                    .message(&ServerMessage::error(
                                        ErrorCode::InternalError,
                                        format!("Failed to encode message for {}", envelope.key),
                                    ))
                                    .await
                            }
                        },
                        None => break "outbound queue closed",
                    },
                    _ = ping.tick() => {
                        if pong_deadline.is_none() {
                            pong_deadline = Some(Instant::now() + self.config.pong_timeout);
                        }
                        writer.frame(SocketFrame::Ping(Vec::new())).await
                    }
                    _ = sleep_until(pong_deadline.unwrap_or_else(Instant::now)), if pong_deadline.is_some() => {
                        warn!("[LiveSocket] {} missed pong, closing", id);
                        break "pong timeout";
                    }
                    changed = state_rx.changed(), if watching_state => match changed {
                        Ok(()) => {
                            let state = *state_rx.borrow_and_update();
                            writer.message(&ServerMessage::ConnectionStatus { state }).await
                        }
                        Err(_) => {
                            watching_state = false;
                            Ok(())
                        }
                    },
                    _ = &mut shutdown => break "server shutting down",
                };

                if let Err(reason) = written {
                    break reason;
                }
            },
        };

        let dropped = consumer.dropped();
        drop(consumer);
        let _ = outbound.try_send(SocketFrame::Close);
        info!(
            "[LiveSocket] Connection closed: {} ({}, {} envelopes dropped)",
            id, reason, dropped
        );
    }
}

/// Outbound writes, each bounded by a deadline
struct Writer<'a> {
    outbound: &'a mpsc::Sender<SocketFrame>,
    deadline: Duration,
}

impl Writer<'_> {
    /// Queue a frame; the error is the reason to close the connection
    async fn frame(&self, frame: SocketFrame) -> Result<(), &'static str> {
        match tokio::time::timeout(self.deadline, self.outbound.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err("write failed"),
            Err(_) => Err("client stopped reading"),
        }
    }

    /// Serialize and queue a protocol message
    async fn message(&self, message: &ServerMessage) -> Result<(), &'static str> {
        match serde_json::to_string(message) {
            Ok(json) => self.frame(SocketFrame::Text(json)).await,
            Err(e) => {
                error!("[LiveSocket] Failed to serialize message: {}", e);
                Ok(())
            }
        }
    }
}

/// Apply one client control message and produce the reply
fn handle_text(consumer: &mut Consumer, text: &str) -> ServerMessage {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            return ServerMessage::error(ErrorCode::InvalidMessage, format!("Invalid JSON: {}", e))
        }
    };

    match message {
        ClientMessage::Subscribe { stream } => match stream.parse::<StreamKey>() {
            Ok(key) => {
                let stream = key.to_string();
                let subscription = consumer.subscribe(key);
                debug!(
                    "[LiveSocket] {} subscribed to {} (refs: {})",
                    consumer.id(),
                    stream,
                    subscription.ref_count
                );
                ServerMessage::Subscribed { stream }
            }
            Err(e) => ServerMessage::error(ErrorCode::InvalidStream, e.to_string()),
        },
        ClientMessage::Unsubscribe { stream } => match stream.parse::<StreamKey>() {
            Ok(key) => {
                consumer.unsubscribe(&key);
                debug!("[LiveSocket] {} unsubscribed from {}", consumer.id(), key);
                ServerMessage::Unsubscribed {
                    stream: key.to_string(),
                }
            }
            Err(e) => ServerMessage::error(ErrorCode::InvalidStream, e.to_string()),
        },
        ClientMessage::Ping { timestamp } => ServerMessage::Pong {
            client_timestamp: timestamp,
            server_timestamp: Utc::now().timestamp_millis(),
        },
    }
}

impl std::fmt::Debug for LiveSocketBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveSocketBridge")
            .field("config", &self.config)
            .finish()
    }
}
