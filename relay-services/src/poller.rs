//! Polling fallback
//!
//! For clients behind environments where even the shared upstream stream is
//! not an option: fetch a REST snapshot on a fixed interval and synthesize an
//! envelope from each one. Every listener polls on its own; there is no
//! connection to lose and so no reconnect logic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use relay_binance::BinanceRestClient;
use relay_core::{Envelope, RelayResult, TickerSnapshot};

use crate::consumer::TransportKind;
use crate::hub::RelayHub;
use crate::sse::{ack_event, StreamRequest};

/// Source of ticker snapshots
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn snapshot(&self, symbol: &str) -> RelayResult<TickerSnapshot>;
}

#[async_trait]
impl SnapshotSource for BinanceRestClient {
    async fn snapshot(&self, symbol: &str) -> RelayResult<TickerSnapshot> {
        self.ticker_24hr(symbol).await
    }
}

/// Poll the request's symbol every `period` and return its event stream
///
/// The first item is the acknowledgement; a snapshot follows immediately,
/// then one per tick. Failed fetches are logged and that tick is skipped.
pub fn poll_events(
    hub: &RelayHub,
    source: Arc<dyn SnapshotSource>,
    request: &StreamRequest,
    period: Duration,
) -> BoxStream<'static, String> {
    // Counted as a consumer for visibility; it never joins the registry
    let consumer = hub.open_consumer(TransportKind::Poll);
    info!(
        "[Poller] {} polling {} every {:?}",
        consumer.id(),
        request.key.symbol(),
        period
    );

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let key = request.key.clone();

    let ack = stream::once(std::future::ready(ack_event(&request.ack_stream)));
    let snapshots = stream::unfold(
        (consumer, ticker, source, key),
        |(consumer, mut ticker, source, key)| async move {
            loop {
                ticker.tick().await;
                let snapshot = match source.snapshot(key.symbol()).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!("[Poller] Snapshot for {} failed: {}", key.symbol(), e);
                        continue;
                    }
                };
                debug!("[Poller] {}", snapshot.summary());

                let frame = serde_json::to_value(&snapshot)
                    .and_then(|payload| Envelope::new(key.clone(), payload).to_frame());
                match frame {
                    Ok(json) => return Some((json, (consumer, ticker, source, key))),
                    Err(e) => warn!("[Poller] Failed to serialize snapshot: {}", e),
                }
            }
        },
    );

    ack.chain(snapshots)
        .take_until(hub.shutdown_signal())
        .boxed()
}
