//! Upstream connection status
//!
//! Written by the supervisor, read by health checks and live-socket
//! consumers (which forward state changes to their clients).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use relay_core::{ConnectionState, RelayError};

/// Health of the upstream connection
#[derive(Debug, Clone, Serialize)]
pub struct UpstreamHealth {
    pub target: String,
    pub state: ConnectionState,
    pub connected: bool,
    pub last_message_time: Option<DateTime<Utc>>,
    pub message_count: u64,
    pub is_stale: bool,
    pub failed_attempts: u32,
    pub last_error: Option<String>,
    /// Set once repeated attempts have failed; cleared on the next open
    pub unavailable: Option<String>,
}

/// Live upstream status (atomic for thread-safe access)
#[derive(Debug)]
pub struct UpstreamStatus {
    state: watch::Sender<ConnectionState>,
    target: Mutex<String>,
    connected: AtomicBool,
    last_message_epoch_ms: AtomicU64,
    message_count: AtomicU64,
    failed_attempts: AtomicU32,
    last_error: Mutex<Option<String>>,
    unavailable: Mutex<Option<RelayError>>,
}

fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl UpstreamStatus {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            target: Mutex::new(String::new()),
            connected: AtomicBool::new(false),
            last_message_epoch_ms: AtomicU64::new(0),
            message_count: AtomicU64::new(0),
            failed_attempts: AtomicU32::new(0),
            last_error: Mutex::new(None),
            unavailable: Mutex::new(None),
        }
    }

    pub fn set_target(&self, target: impl Into<String>) {
        *self.target.lock() = target.into();
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.connected.store(state.is_connected(), Ordering::SeqCst);
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    pub fn watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn record_message(&self) {
        self.last_message_epoch_ms
            .store(now_epoch_ms(), Ordering::SeqCst);
        self.message_count.fetch_add(1, Ordering::SeqCst);
    }

    /// A connection opened: clear failure tracking
    pub fn record_open(&self) {
        self.failed_attempts.store(0, Ordering::SeqCst);
        *self.unavailable.lock() = None;
    }

    /// Record a failed attempt or a lost session; returns consecutive failures
    pub fn record_failure(&self, error: &RelayError) -> u32 {
        *self.last_error.lock() = Some(error.to_string());
        self.failed_attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn set_unavailable(&self, error: RelayError) {
        *self.unavailable.lock() = Some(error);
    }

    pub fn unavailable(&self) -> Option<RelayError> {
        self.unavailable.lock().clone()
    }

    pub fn health(&self, stale_after: Duration) -> UpstreamHealth {
        let connected = self.connected.load(Ordering::SeqCst);
        let last_ms = self.last_message_epoch_ms.load(Ordering::SeqCst);

        let last_message_time = if last_ms > 0 {
            DateTime::from_timestamp_millis(last_ms as i64)
        } else {
            None
        };

        let is_stale = if connected && last_ms > 0 {
            now_epoch_ms().saturating_sub(last_ms) > stale_after.as_millis() as u64
        } else {
            !connected
        };

        UpstreamHealth {
            target: self.target.lock().clone(),
            state: self.state(),
            connected,
            last_message_time,
            message_count: self.message_count.load(Ordering::SeqCst),
            is_stale,
            failed_attempts: self.failed_attempts.load(Ordering::SeqCst),
            last_error: self.last_error.lock().clone(),
            unavailable: self.unavailable.lock().as_ref().map(|e| e.to_string()),
        }
    }
}

impl Default for UpstreamStatus {
    fn default() -> Self {
        Self::new()
    }
}
