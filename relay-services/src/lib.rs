//! Relay services
//!
//! This crate holds the moving parts of the relay: the reference-counted
//! subscription registry, the fan-out dispatcher, the upstream supervisor
//! and the downstream adapters (live socket, SSE, polling).

pub mod backoff;
pub mod config;
pub mod consumer;
pub mod dispatcher;
pub mod hub;
pub mod poller;
pub mod registry;
pub mod sse;
pub mod status;
pub mod supervisor;
pub mod websocket;

pub use backoff::Backoff;
pub use config::{ConfigError, ReconnectConfig, RelayConfig};
pub use consumer::{Consumer, ConsumerId, TransportKind};
pub use dispatcher::{DispatcherStats, FanoutDispatcher, PublishOutcome};
pub use hub::{RelayHealth, RelayHub};
pub use poller::{poll_events, SnapshotSource};
pub use registry::{Subscription, SubscriptionCommand, SubscriptionRegistry};
pub use sse::{ack_event, live_events, StreamMode, StreamQuery, StreamRequest};
pub use status::{UpstreamHealth, UpstreamStatus};
pub use supervisor::{Supervisor, SupervisorConfig, SupervisorHandle};
pub use websocket::{LiveSocketBridge, LiveSocketConfig};
