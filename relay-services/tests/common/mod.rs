//! Scripted in-memory exchange for driving the supervisor in tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use relay_core::{
    ControlFrame, Envelope, RelayError, RelayResult, StreamKey, UpstreamConnection,
    UpstreamConnector, UpstreamEvent,
};
use relay_services::{ReconnectConfig, SupervisorConfig};

enum Outcome {
    Accept(MockConnection),
    Refuse(String),
}

/// Connector handed to the supervisor. Each `connect` waits for the test to
/// accept or refuse it through the paired [`MockExchange`].
pub struct MockConnector {
    outcomes: Arc<Mutex<mpsc::UnboundedReceiver<Outcome>>>,
    attempts: Arc<AtomicUsize>,
}

/// Test-side control over connection attempts
pub struct MockExchange {
    outcomes: mpsc::UnboundedSender<Outcome>,
    attempts: Arc<AtomicUsize>,
}

pub fn mock_exchange() -> (MockConnector, MockExchange) {
    let (tx, rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicUsize::new(0));
    (
        MockConnector {
            outcomes: Arc::new(Mutex::new(rx)),
            attempts: Arc::clone(&attempts),
        },
        MockExchange {
            outcomes: tx,
            attempts,
        },
    )
}

impl MockExchange {
    /// Accept the next connection attempt; the connection answers pings
    pub fn accept(&self) -> MockRemote {
        self.open(true)
    }

    /// Accept the next connection attempt; the connection never answers pings
    pub fn accept_silent(&self) -> MockRemote {
        self.open(false)
    }

    fn open(&self, answers_pings: bool) -> MockRemote {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let conn = MockConnection {
            events: events_rx,
            frames: frames_tx,
            answers_pings,
            pong_pending: false,
        };
        let _ = self.outcomes.send(Outcome::Accept(conn));
        MockRemote {
            events: events_tx,
            frames: frames_rx,
        }
    }

    /// Refuse the next connection attempt
    pub fn refuse(&self, reason: &str) {
        let _ = self.outcomes.send(Outcome::Refuse(reason.to_string()));
    }

    /// Connection attempts made so far
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    type Connection = MockConnection;

    fn target(&self) -> String {
        "mock://exchange/stream".to_string()
    }

    async fn connect(&self) -> RelayResult<MockConnection> {
        let mut outcomes = self.outcomes.lock().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match outcomes.recv().await {
            Some(Outcome::Accept(conn)) => Ok(conn),
            Some(Outcome::Refuse(reason)) => Err(RelayError::transport(reason)),
            None => Err(RelayError::transport("exchange gone")),
        }
    }
}

pub struct MockConnection {
    events: mpsc::UnboundedReceiver<RelayResult<UpstreamEvent>>,
    frames: mpsc::UnboundedSender<ControlFrame>,
    answers_pings: bool,
    pong_pending: bool,
}

#[async_trait]
impl UpstreamConnection for MockConnection {
    async fn send(&mut self, frame: ControlFrame) -> RelayResult<()> {
        self.frames
            .send(frame)
            .map_err(|_| RelayError::transport("remote gone"))
    }

    async fn recv(&mut self) -> RelayResult<UpstreamEvent> {
        if self.pong_pending {
            self.pong_pending = false;
            return Ok(UpstreamEvent::Pong);
        }
        match self.events.recv().await {
            Some(event) => event,
            None => Ok(UpstreamEvent::Closed {
                reason: Some("remote dropped".to_string()),
            }),
        }
    }

    async fn ping(&mut self) -> RelayResult<()> {
        self.pong_pending = self.answers_pings;
        Ok(())
    }

    async fn close(&mut self) {}
}

/// Exchange side of one accepted connection. Dropping it disconnects.
pub struct MockRemote {
    events: mpsc::UnboundedSender<RelayResult<UpstreamEvent>>,
    frames: mpsc::UnboundedReceiver<ControlFrame>,
}

impl MockRemote {
    pub fn push(&self, envelope: Envelope) {
        self.push_event(UpstreamEvent::Envelope(envelope));
    }

    pub fn push_event(&self, event: UpstreamEvent) {
        let _ = self.events.send(Ok(event));
    }

    pub fn fail(&self, error: RelayError) {
        let _ = self.events.send(Err(error));
    }

    /// Next control frame sent by the relay
    pub async fn next_frame(&mut self) -> ControlFrame {
        tokio::time::timeout(Duration::from_secs(2), self.frames.recv())
            .await
            .expect("timed out waiting for control frame")
            .expect("connection closed")
    }

    /// Assert nothing else arrives within `window`
    pub async fn expect_quiet(&mut self, window: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(window, self.frames.recv()).await {
            panic!("unexpected control frame: {:?}", frame);
        }
    }
}

pub fn key(name: &str) -> StreamKey {
    name.parse().unwrap()
}

pub fn envelope(stream: &str, seq: u64) -> Envelope {
    Envelope::new(key(stream), json!({ "seq": seq }))
}

pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        reconnect: ReconnectConfig {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            reset_after: Duration::from_secs(60),
            unavailable_after: 3,
        },
        ping_interval: Duration::from_secs(30),
        pong_timeout: Duration::from_secs(10),
        max_streams_per_frame: 200,
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_for<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within 2s"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
