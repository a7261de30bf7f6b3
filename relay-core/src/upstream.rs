//! Upstream connection abstraction
//!
//! The supervisor drives an [`UpstreamConnector`] to obtain live
//! [`UpstreamConnection`]s. The exchange implementation lives in
//! `relay-binance`; tests plug in scripted connections.

use async_trait::async_trait;

use crate::{Envelope, RelayResult, StreamKey};

/// Control frame sent to the exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    Subscribe(Vec<StreamKey>),
    Unsubscribe(Vec<StreamKey>),
}

impl ControlFrame {
    pub fn keys(&self) -> &[StreamKey] {
        match self {
            ControlFrame::Subscribe(keys) | ControlFrame::Unsubscribe(keys) => keys,
        }
    }
}

/// Event produced by an upstream connection
#[derive(Debug, Clone)]
pub enum UpstreamEvent {
    /// A market-data message
    Envelope(Envelope),
    /// The exchange accepted control frame `id`
    Ack { id: u64 },
    /// The exchange rejected a control frame
    Rejected {
        streams: Vec<StreamKey>,
        message: String,
    },
    /// Reply to a transport ping
    Pong,
    /// The exchange closed the connection
    Closed { reason: Option<String> },
}

/// Opens physical connections to one upstream target
#[async_trait]
pub trait UpstreamConnector: Send + Sync + 'static {
    type Connection: UpstreamConnection;

    /// Human readable target, used in logs and health output
    fn target(&self) -> String;

    async fn connect(&self) -> RelayResult<Self::Connection>;
}

/// One live upstream connection
///
/// Implementations drop frames they cannot parse (after logging them) and
/// keep reading; only transport failures surface as errors from `recv`.
#[async_trait]
pub trait UpstreamConnection: Send + 'static {
    async fn send(&mut self, frame: ControlFrame) -> RelayResult<()>;

    async fn recv(&mut self) -> RelayResult<UpstreamEvent>;

    /// Send a transport-level ping
    async fn ping(&mut self) -> RelayResult<()>;

    async fn close(&mut self);
}
