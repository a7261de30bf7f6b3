//! WebSocket message types for the live-socket protocol
//!
//! These types define the protocol between the relay and its downstream
//! clients. Data frames themselves are produced by [`crate::Envelope::to_frame`].

use serde::{Deserialize, Serialize};

// ============================================================================
// Client -> Server Messages
// ============================================================================

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Subscribe to a stream, e.g. `btcusdt@aggTrade`
    Subscribe {
        stream: String,
    },
    /// Unsubscribe from a stream
    Unsubscribe {
        stream: String,
    },
    /// Ping to keep connection alive
    Ping {
        /// Client timestamp
        timestamp: i64,
    },
}

// ============================================================================
// Server -> Client Messages
// ============================================================================

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Stream acknowledgement sent first on server-sent-event streams
    Connected {
        stream: String,
    },
    /// Subscription confirmed
    Subscribed {
        stream: String,
    },
    /// Unsubscription confirmed
    Unsubscribed {
        stream: String,
    },
    /// Error message
    Error {
        code: ErrorCode,
        message: String,
    },
    /// Pong response to client ping
    Pong {
        /// Echo back client timestamp
        client_timestamp: i64,
        /// Server timestamp
        server_timestamp: i64,
    },
    /// Upstream connection status update
    ConnectionStatus {
        state: ConnectionState,
    },
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for WebSocket errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Invalid message format
    InvalidMessage,
    /// Stream name could not be parsed
    InvalidStream,
    /// Internal server error
    InternalError,
}

/// Connection state of the upstream exchange connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected and not trying yet
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Connected and receiving data
    Connected,
    /// Ping timed out; connection is being torn down
    Degraded,
    /// Waiting out the backoff before the next attempt
    Reconnecting,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

// ============================================================================
// Transport frames
// ============================================================================

/// Transport-neutral socket frame exchanged between a live-socket consumer
/// and whatever WebSocket implementation carries it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_subscribe_wire_format() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe","stream":"btcusdt@aggTrade"}"#).unwrap();
        match msg {
            ClientMessage::Subscribe { stream } => assert_eq!(stream, "btcusdt@aggTrade"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_connected_ack_wire_format() {
        let json = serde_json::to_string(&ServerMessage::Connected {
            stream: "ethusdt".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"connected","stream":"ethusdt"}"#);
    }

    #[test]
    fn test_connection_status_wire_format() {
        let json = serde_json::to_value(ServerMessage::ConnectionStatus {
            state: ConnectionState::Reconnecting,
        })
        .unwrap();
        assert_eq!(json["type"], "connection_status");
        assert_eq!(json["state"], "reconnecting");
    }
}
