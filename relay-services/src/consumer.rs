//! Downstream consumers
//!
//! A [`Consumer`] is one downstream subscriber (live socket, SSE stream or
//! poller) together with its bounded outbound queue. It owns its stream set;
//! dropping it detaches every stream and unregisters the queue, whatever the
//! reason the transport went away.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use relay_core::{Envelope, StreamKey};

use crate::dispatcher::FanoutDispatcher;
use crate::registry::{Subscription, SubscriptionRegistry};

/// Unique identifier for a downstream consumer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ConsumerId(pub u64);

impl std::fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Transport a consumer is attached through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    LiveSocket,
    Sse,
    Poll,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportKind::LiveSocket => "live_socket",
            TransportKind::Sse => "sse",
            TransportKind::Poll => "poll",
        };
        f.write_str(name)
    }
}

pub struct Consumer {
    id: ConsumerId,
    transport: TransportKind,
    keys: HashSet<StreamKey>,
    rx: mpsc::Receiver<Envelope>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: Arc<FanoutDispatcher>,
}

impl Consumer {
    pub(crate) fn new(
        id: ConsumerId,
        transport: TransportKind,
        capacity: usize,
        registry: Arc<SubscriptionRegistry>,
        dispatcher: Arc<FanoutDispatcher>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        dispatcher.register(id, tx);
        debug!("[Consumer] Opened {} ({})", id, transport);

        Self {
            id,
            transport,
            keys: HashSet::new(),
            rx,
            registry,
            dispatcher,
        }
    }

    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    /// Attach to a stream
    pub fn subscribe(&mut self, key: StreamKey) -> Subscription {
        let subscription = self.registry.attach(&key, self.id);
        self.keys.insert(key);
        subscription
    }

    /// Detach from a stream. Returns whether the consumer was subscribed.
    pub fn unsubscribe(&mut self, key: &StreamKey) -> bool {
        if !self.keys.remove(key) {
            return false;
        }
        self.registry.detach(key, self.id)
    }

    /// Next envelope for a stream this consumer is still subscribed to.
    ///
    /// Envelopes queued before an unsubscribe are discarded here. Returns
    /// `None` once the dispatcher has dropped the queue.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            let envelope = self.rx.recv().await?;
            if self.keys.contains(&envelope.key) {
                return Some(envelope);
            }
        }
    }

    /// Envelopes dropped for this consumer because its queue was full
    pub fn dropped(&self) -> u64 {
        self.dispatcher.dropped_for(self.id)
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let detached = self.registry.detach_all(self.id, self.keys.iter());
        let dropped = self.dispatcher.unregister(self.id).unwrap_or(0);
        debug!(
            "[Consumer] Closed {} ({}): detached {} streams, {} envelopes dropped",
            self.id, self.transport, detached, dropped
        );
    }
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("streams", &self.keys.len())
            .finish()
    }
}
