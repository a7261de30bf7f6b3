//! Relay hub
//!
//! Shared handle tying the registry, dispatcher and upstream status together.
//! Downstream adapters open consumers through it; the supervisor publishes
//! into it.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::info;

use relay_core::{ConnectionState, Envelope};

use crate::config::RelayConfig;
use crate::consumer::{Consumer, ConsumerId, TransportKind};
use crate::dispatcher::{FanoutDispatcher, PublishOutcome};
use crate::registry::{SubscriptionCommand, SubscriptionRegistry};
use crate::status::{UpstreamHealth, UpstreamStatus};

/// Overall relay health
#[derive(Debug, Clone, Serialize)]
pub struct RelayHealth {
    pub upstream: UpstreamHealth,
    pub active_subscriptions: usize,
    pub consumers: usize,
    pub dropped_envelopes: u64,
    pub stale_streams: usize,
    pub healthy: bool,
}

pub struct RelayHub {
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<FanoutDispatcher>,
    status: Arc<UpstreamStatus>,
    next_consumer_id: AtomicU64,
    queue_capacity: usize,
    stale_after: Duration,
    /// Set once the server starts shutting down; ends every downstream stream
    shutdown: watch::Sender<bool>,
}

impl RelayHub {
    /// Create a hub; the receiver is handed to the supervisor
    pub fn new(
        queue_capacity: usize,
        stale_after: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SubscriptionCommand>) {
        let (registry, commands) = SubscriptionRegistry::new();
        let registry = Arc::new(registry);
        let dispatcher = Arc::new(FanoutDispatcher::new(Arc::clone(&registry)));

        let hub = Arc::new(Self {
            registry,
            dispatcher,
            status: Arc::new(UpstreamStatus::new()),
            next_consumer_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
            stale_after,
            shutdown: watch::Sender::new(false),
        });
        (hub, commands)
    }

    pub fn from_config(
        config: &RelayConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<SubscriptionCommand>) {
        Self::new(config.consumer_queue, config.stale_after)
    }

    /// Open a new consumer with its own outbound queue
    pub fn open_consumer(&self, transport: TransportKind) -> Consumer {
        let id = ConsumerId(self.next_consumer_id.fetch_add(1, Ordering::SeqCst));
        Consumer::new(
            id,
            transport,
            self.queue_capacity,
            Arc::clone(&self.registry),
            Arc::clone(&self.dispatcher),
        )
    }

    pub fn publish(&self, envelope: Envelope) -> PublishOutcome {
        self.dispatcher.publish(envelope)
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Arc<FanoutDispatcher> {
        &self.dispatcher
    }

    pub fn status(&self) -> &Arc<UpstreamStatus> {
        &self.status
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.status.watch()
    }

    /// Ask every downstream connection to finish
    ///
    /// Live sockets close, SSE and polling streams end. Consumers opened
    /// afterwards end immediately.
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!("[Hub] Shutting down downstream connections");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Resolves once [`RelayHub::shutdown`] has been called
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut rx = self.shutdown.subscribe();
        async move {
            // The sender lives in the hub; an error means the hub is gone
            let _ = rx.wait_for(|stopping| *stopping).await;
        }
    }

    pub fn health(&self) -> RelayHealth {
        let upstream = self.status.health(self.stale_after);
        let active_subscriptions = self.registry.len();
        let stats = self.dispatcher.stats();
        let threshold = chrono::Duration::from_std(self.stale_after)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let stale_streams = self.registry.stale_count(Utc::now(), threshold);

        // An idle feed is only a problem if someone is waiting on it
        let healthy = upstream.connected
            && upstream.unavailable.is_none()
            && (active_subscriptions == 0 || !upstream.is_stale);

        RelayHealth {
            upstream,
            active_subscriptions,
            consumers: stats.consumers,
            dropped_envelopes: stats.dropped,
            stale_streams,
            healthy,
        }
    }
}

impl std::fmt::Debug for RelayHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayHub")
            .field("registry", &self.registry)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
