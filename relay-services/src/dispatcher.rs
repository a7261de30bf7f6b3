//! Fan-out dispatcher
//!
//! Delivers each published envelope to every consumer attached to its stream.
//! Delivery never waits: a consumer whose queue is full loses that envelope
//! and has its drop counter bumped, everyone else is unaffected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use relay_core::{Envelope, RelayError};

use crate::consumer::ConsumerId;
use crate::registry::SubscriptionRegistry;

/// Log one warning per this many drops for a single consumer
const DROP_LOG_EVERY: u64 = 100;

struct ConsumerHandle {
    tx: mpsc::Sender<Envelope>,
    dropped: AtomicU64,
}

/// Result of publishing one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Counters over the dispatcher's lifetime
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatcherStats {
    pub consumers: usize,
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
}

pub struct FanoutDispatcher {
    registry: Arc<SubscriptionRegistry>,
    consumers: DashMap<ConsumerId, ConsumerHandle>,
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl FanoutDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            registry,
            consumers: DashMap::new(),
            published: AtomicU64::new(0),
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Register a consumer's outbound queue
    pub fn register(&self, id: ConsumerId, tx: mpsc::Sender<Envelope>) {
        self.consumers.insert(
            id,
            ConsumerHandle {
                tx,
                dropped: AtomicU64::new(0),
            },
        );
    }

    /// Remove a consumer's outbound queue. Returns how many envelopes it lost.
    pub fn unregister(&self, id: ConsumerId) -> Option<u64> {
        self.consumers
            .remove(&id)
            .map(|(_, handle)| handle.dropped.load(Ordering::Relaxed))
    }

    /// Fan an envelope out to every consumer attached to its stream
    pub fn publish(&self, envelope: Envelope) -> PublishOutcome {
        self.published.fetch_add(1, Ordering::Relaxed);

        let targets = self.registry.record_message(&envelope.key, envelope.received_at);
        let mut outcome = PublishOutcome::default();

        for id in targets {
            let Some(handle) = self.consumers.get(&id) else {
                continue;
            };

            match handle.tx.try_send(envelope.clone()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.dropped += 1;
                    let total = handle.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    if total == 1 || total % DROP_LOG_EVERY == 0 {
                        warn!(
                            "[Dispatcher] {} on {} ({} dropped so far)",
                            RelayError::backpressure(id),
                            envelope.key,
                            total
                        );
                    }
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("[Dispatcher] {} queue closed, skipping", id);
                }
            }
        }

        self.delivered
            .fetch_add(outcome.delivered as u64, Ordering::Relaxed);
        self.dropped
            .fetch_add(outcome.dropped as u64, Ordering::Relaxed);
        outcome
    }

    /// Envelopes dropped for one consumer
    pub fn dropped_for(&self, id: ConsumerId) -> u64 {
        self.consumers
            .get(&id)
            .map(|handle| handle.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            consumers: self.consumers.len(),
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for FanoutDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanoutDispatcher")
            .field("consumers", &self.consumers.len())
            .finish()
    }
}
