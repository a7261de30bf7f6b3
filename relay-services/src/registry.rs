//! Subscription registry
//!
//! Process-wide, reference-counted set of wanted streams. The registry is the
//! single source of truth for what the upstream connection should carry: the
//! supervisor replays [`SubscriptionRegistry::active_keys`] on every reconnect.
//!
//! All mutation happens under one lock. Upstream requests for 0→1 and 1→0
//! transitions are pushed onto an unbounded ordered channel while that lock
//! is held, so the supervisor always sees them in transition order.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::StreamKey;

use crate::consumer::ConsumerId;

/// Request issued to the supervisor when a stream gains its first or loses
/// its last consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionCommand {
    Subscribe(StreamKey),
    Unsubscribe(StreamKey),
}

/// Snapshot of one wanted stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Subscription {
    pub stream: StreamKey,
    pub ref_count: usize,
    pub last_message_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct Entry {
    consumers: HashSet<ConsumerId>,
    last_message_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn snapshot(&self, key: &StreamKey) -> Subscription {
        Subscription {
            stream: key.clone(),
            ref_count: self.consumers.len(),
            last_message_at: self.last_message_at,
        }
    }
}

/// Reference-counted registry of wanted streams
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<StreamKey, Entry>>,
    commands: mpsc::UnboundedSender<SubscriptionCommand>,
}

impl SubscriptionRegistry {
    /// Create a registry and the receiving end of its upstream command channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriptionCommand>) {
        let (commands, rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: Mutex::new(HashMap::new()),
                commands,
            },
            rx,
        )
    }

    /// Attach a consumer to a stream. Attaching the same consumer twice is a
    /// no-op.
    pub fn attach(&self, key: &StreamKey, consumer: ConsumerId) -> Subscription {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.clone()).or_default();

        if entry.consumers.insert(consumer) && entry.consumers.len() == 1 {
            info!("[Registry] First consumer for {}, subscribing upstream", key);
            self.request(SubscriptionCommand::Subscribe(key.clone()));
        }

        debug!(
            "[Registry] {} attached to {} (refs: {})",
            consumer,
            key,
            entry.consumers.len()
        );
        entry.snapshot(key)
    }

    /// Detach a consumer from a stream. Returns whether it was attached.
    pub fn detach(&self, key: &StreamKey, consumer: ConsumerId) -> bool {
        let mut entries = self.entries.lock();
        self.detach_locked(&mut entries, key, consumer)
    }

    /// Detach a consumer from every listed stream (consumer teardown)
    pub fn detach_all<'a, I>(&self, consumer: ConsumerId, keys: I) -> usize
    where
        I: IntoIterator<Item = &'a StreamKey>,
    {
        let mut entries = self.entries.lock();
        keys.into_iter()
            .filter(|key| self.detach_locked(&mut entries, key, consumer))
            .count()
    }

    fn detach_locked(
        &self,
        entries: &mut HashMap<StreamKey, Entry>,
        key: &StreamKey,
        consumer: ConsumerId,
    ) -> bool {
        let Some(entry) = entries.get_mut(key) else {
            return false;
        };
        if !entry.consumers.remove(&consumer) {
            return false;
        }

        debug!(
            "[Registry] {} detached from {} (refs: {})",
            consumer,
            key,
            entry.consumers.len()
        );

        if entry.consumers.is_empty() {
            entries.remove(key);
            info!("[Registry] Last consumer left {}, unsubscribing upstream", key);
            self.request(SubscriptionCommand::Unsubscribe(key.clone()));
        }
        true
    }

    fn request(&self, command: SubscriptionCommand) {
        // Replay on the next connect covers a missing supervisor
        if self.commands.send(command).is_err() {
            debug!("[Registry] Supervisor not running, command dropped");
        }
    }

    /// Every stream with at least one consumer, in canonical-name order
    pub fn active_keys(&self) -> Vec<StreamKey> {
        let mut keys: Vec<StreamKey> = self.entries.lock().keys().cloned().collect();
        keys.sort_by_cached_key(|key| key.to_string());
        keys
    }

    pub fn ref_count(&self, key: &StreamKey) -> usize {
        self.entries
            .lock()
            .get(key)
            .map(|entry| entry.consumers.len())
            .unwrap_or(0)
    }

    /// Stamp a message for `key` and return the consumers it should go to
    pub fn record_message(&self, key: &StreamKey, at: DateTime<Utc>) -> Vec<ConsumerId> {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_message_at = Some(at);
                entry.consumers.iter().copied().collect()
            }
            None => Vec::new(),
        }
    }

    /// Snapshot of every wanted stream, in canonical-name order
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let mut subs: Vec<Subscription> = self
            .entries
            .lock()
            .iter()
            .map(|(key, entry)| entry.snapshot(key))
            .collect();
        subs.sort_by_cached_key(|sub| sub.stream.to_string());
        subs
    }

    /// Streams whose last message is older than `threshold`.
    /// Streams that never received anything are not counted.
    pub fn stale_count(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|entry| {
                entry
                    .last_message_at
                    .is_some_and(|at| now.signed_duration_since(at) > threshold)
            })
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("streams", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(name: &str) -> StreamKey {
        name.parse().unwrap()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SubscriptionCommand>) -> Vec<SubscriptionCommand> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_first_attach_and_last_detach_issue_commands() {
        let (registry, mut rx) = SubscriptionRegistry::new();
        let btc = key("btcusdt@aggTrade");

        let sub = registry.attach(&btc, ConsumerId(1));
        assert_eq!(sub.ref_count, 1);
        registry.attach(&btc, ConsumerId(2));
        assert_eq!(registry.ref_count(&btc), 2);

        assert!(registry.detach(&btc, ConsumerId(1)));
        assert!(registry.detach(&btc, ConsumerId(2)));
        assert_eq!(registry.ref_count(&btc), 0);
        assert!(registry.is_empty());

        assert_eq!(
            drain(&mut rx),
            vec![
                SubscriptionCommand::Subscribe(btc.clone()),
                SubscriptionCommand::Unsubscribe(btc),
            ]
        );
    }

    #[test]
    fn test_attach_is_idempotent_per_consumer() {
        let (registry, mut rx) = SubscriptionRegistry::new();
        let eth = key("ethusdt@ticker");

        registry.attach(&eth, ConsumerId(7));
        let sub = registry.attach(&eth, ConsumerId(7));
        assert_eq!(sub.ref_count, 1);

        assert!(registry.detach(&eth, ConsumerId(7)));
        assert!(!registry.detach(&eth, ConsumerId(7)));
        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_detach_unknown_is_noop() {
        let (registry, mut rx) = SubscriptionRegistry::new();
        assert!(!registry.detach(&key("btcusdt@trade"), ConsumerId(1)));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_concurrent_attach_detach_issue_one_pair() {
        let (registry, mut rx) = SubscriptionRegistry::new();
        let registry = Arc::new(registry);
        let btc = key("btcusdt@aggTrade");

        let handles: Vec<_> = (0..16u64)
            .map(|id| {
                let registry = Arc::clone(&registry);
                let btc = btc.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        registry.attach(&btc, ConsumerId(id));
                        registry.attach(&btc, ConsumerId(id));
                        registry.detach(&btc, ConsumerId(id));
                    }
                    registry.attach(&btc, ConsumerId(id));
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.ref_count(&btc), 16);

        for id in 0..16u64 {
            registry.detach(&btc, ConsumerId(id));
        }

        // Subscribe/unsubscribe strictly alternate, starting and ending right
        let commands = drain(&mut rx);
        assert!(!commands.is_empty());
        for (i, cmd) in commands.iter().enumerate() {
            match cmd {
                SubscriptionCommand::Subscribe(_) => assert_eq!(i % 2, 0),
                SubscriptionCommand::Unsubscribe(_) => assert_eq!(i % 2, 1),
            }
        }
        assert!(matches!(commands.last(), Some(SubscriptionCommand::Unsubscribe(_))));
    }

    #[test]
    fn test_record_message_and_staleness() {
        let (registry, _rx) = SubscriptionRegistry::new();
        let btc = key("btcusdt@aggTrade");
        let eth = key("ethusdt@aggTrade");
        registry.attach(&btc, ConsumerId(1));
        registry.attach(&eth, ConsumerId(1));

        let now = Utc::now();
        let targets = registry.record_message(&btc, now - chrono::Duration::seconds(120));
        assert_eq!(targets, vec![ConsumerId(1)]);
        registry.record_message(&eth, now);

        assert_eq!(registry.stale_count(now, chrono::Duration::seconds(60)), 1);
        assert!(registry
            .record_message(&key("solusdt@aggTrade"), now)
            .is_empty());
    }

    #[test]
    fn test_active_keys_sorted() {
        let (registry, _rx) = SubscriptionRegistry::new();
        registry.attach(&key("ethusdt@ticker"), ConsumerId(1));
        registry.attach(&key("btcusdt@trade"), ConsumerId(2));

        let keys: Vec<String> = registry.active_keys().iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["btcusdt@trade", "ethusdt@ticker"]);
    }
}
