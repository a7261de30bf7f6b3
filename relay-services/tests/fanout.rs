//! Registry reference counting and fan-out delivery guarantees

mod common;

use std::sync::{Arc, Barrier};
use std::time::Duration;

use relay_services::{ConsumerId, RelayHub, SubscriptionCommand, SubscriptionRegistry, TransportKind};

use common::{envelope, key};

/// Deterministic shuffle (xorshift) so failures are reproducible
fn shuffle<T>(items: &mut [T], mut seed: u64) {
    for i in (1..items.len()).rev() {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        items.swap(i, (seed % (i as u64 + 1)) as usize);
    }
}

#[test]
fn test_one_subscribe_and_one_unsubscribe_for_any_order() {
    let stream = key("btcusdt@aggTrade");

    for seed in 1..=200u64 {
        let (registry, mut commands) = SubscriptionRegistry::new();

        // Every consumer attaches (some twice), then every consumer detaches
        // (some twice), each phase in a random order
        let mut attaches: Vec<u64> = (0..6).chain([1, 4]).collect();
        let mut detaches: Vec<u64> = (0..6).chain([2, 5]).collect();
        shuffle(&mut attaches, seed);
        shuffle(&mut detaches, seed.wrapping_mul(31));

        for id in attaches {
            registry.attach(&stream, ConsumerId(id));
        }
        assert_eq!(registry.ref_count(&stream), 6);
        for id in detaches {
            registry.detach(&stream, ConsumerId(id));
        }
        assert_eq!(registry.ref_count(&stream), 0);

        let mut received = Vec::new();
        while let Ok(cmd) = commands.try_recv() {
            received.push(cmd);
        }
        assert_eq!(
            received,
            vec![
                SubscriptionCommand::Subscribe(stream.clone()),
                SubscriptionCommand::Unsubscribe(stream.clone()),
            ],
            "seed {}",
            seed
        );
    }
}

#[test]
fn test_concurrent_attaches_issue_a_single_subscribe() {
    let stream = key("ethusdt@depth20@100ms");
    let (registry, mut commands) = SubscriptionRegistry::new();
    let registry = Arc::new(registry);
    let barrier = Arc::new(Barrier::new(8));

    let threads: Vec<_> = (0..8u64)
        .map(|id| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let stream = stream.clone();
            std::thread::spawn(move || {
                barrier.wait();
                registry.attach(&stream, ConsumerId(id));
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(registry.ref_count(&stream), 8);
    assert_eq!(
        commands.try_recv().unwrap(),
        SubscriptionCommand::Subscribe(stream.clone())
    );
    assert!(commands.try_recv().is_err());

    let threads: Vec<_> = (0..8u64)
        .map(|id| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            let stream = stream.clone();
            std::thread::spawn(move || {
                barrier.wait();
                registry.detach(&stream, ConsumerId(id));
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }

    assert_eq!(
        commands.try_recv().unwrap(),
        SubscriptionCommand::Unsubscribe(stream)
    );
    assert!(commands.try_recv().is_err());
}

#[tokio::test]
async fn test_per_key_publish_order_is_preserved() {
    let (hub, _commands) = RelayHub::new(1024, Duration::from_secs(60));
    let mut consumer = hub.open_consumer(TransportKind::LiveSocket);
    consumer.subscribe(key("btcusdt@aggTrade"));
    consumer.subscribe(key("ethusdt@aggTrade"));

    let publisher = {
        let hub = Arc::clone(&hub);
        tokio::spawn(async move {
            for seq in 1..=500u64 {
                hub.publish(envelope("btcusdt@aggTrade", seq));
                hub.publish(envelope("ethusdt@aggTrade", seq));
                if seq % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        })
    };

    let mut last_btc = 0;
    let mut last_eth = 0;
    for _ in 0..1000 {
        let envelope = tokio::time::timeout(Duration::from_secs(2), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        let seq = envelope.payload["seq"].as_u64().unwrap();
        let last = if envelope.key.symbol() == "BTCUSDT" {
            &mut last_btc
        } else {
            &mut last_eth
        };
        assert_eq!(seq, *last + 1, "{} out of order", envelope.key);
        *last = seq;
    }
    publisher.await.unwrap();

    assert_eq!((last_btc, last_eth), (500, 500));
    assert_eq!(consumer.dropped(), 0);
}

#[tokio::test]
async fn test_full_queue_only_affects_its_own_consumer() {
    let (hub, _commands) = RelayHub::new(16, Duration::from_secs(60));
    let stream = key("btcusdt@trade");

    let mut stalled = hub.open_consumer(TransportKind::LiveSocket);
    let mut healthy = hub.open_consumer(TransportKind::Sse);
    stalled.subscribe(stream.clone());
    healthy.subscribe(stream.clone());

    for seq in 1..=100u64 {
        let outcome = hub.publish(envelope("btcusdt@trade", seq));
        assert!(outcome.delivered >= 1);

        let received = healthy.recv().await.unwrap();
        assert_eq!(received.payload["seq"], seq);
    }

    assert_eq!(healthy.dropped(), 0);
    assert_eq!(stalled.dropped(), 84);
    assert_eq!(hub.dispatcher().stats().dropped, 84);

    // The stalled consumer still has the oldest envelopes, in order
    for seq in 1..=16u64 {
        assert_eq!(stalled.recv().await.unwrap().payload["seq"], seq);
    }
}
