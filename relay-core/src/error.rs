//! Error types for the relay

use thiserror::Error;

/// Relay-wide error type
///
/// None of these variants is fatal to the process: transport and parse
/// failures are recovered by the component that detects them, and
/// `UpstreamUnavailable` only ever surfaces as a degraded health status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Socket-level failure on the upstream connection
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed upstream frame or request payload
    #[error("Parse error: {0}")]
    Parse(String),

    /// The exchange rejected a subscribe/unsubscribe control frame
    #[error("Subscription rejected for [{streams}]: {message}")]
    Subscription { streams: String, message: String },

    /// A consumer's outbound queue is full
    #[error("Consumer {consumer} outbound queue is full")]
    ConsumerBackpressure { consumer: String },

    /// The upstream endpoint could not be reached after repeated attempts
    #[error("Upstream unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    #[error("Invalid stream: {0}")]
    InvalidStream(String),

    /// REST API failure (polling fallback / snapshot proxy)
    #[error("API error: {0}")]
    Api(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn transport(msg: impl Into<String>) -> Self {
        RelayError::Transport(msg.into())
    }

    pub fn parse(msg: impl Into<String>) -> Self {
        RelayError::Parse(msg.into())
    }

    pub fn subscription(streams: impl Into<String>, message: impl Into<String>) -> Self {
        RelayError::Subscription {
            streams: streams.into(),
            message: message.into(),
        }
    }

    pub fn backpressure(consumer: impl ToString) -> Self {
        RelayError::ConsumerBackpressure {
            consumer: consumer.to_string(),
        }
    }

    pub fn upstream_unavailable(attempts: u32, message: impl Into<String>) -> Self {
        RelayError::UpstreamUnavailable {
            attempts,
            message: message.into(),
        }
    }

    pub fn invalid_stream(msg: impl Into<String>) -> Self {
        RelayError::InvalidStream(msg.into())
    }

    pub fn api(msg: impl Into<String>) -> Self {
        RelayError::Api(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        RelayError::Internal(msg.into())
    }
}

impl From<serde_json::Error> for RelayError {
    fn from(err: serde_json::Error) -> Self {
        RelayError::Parse(err.to_string())
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
