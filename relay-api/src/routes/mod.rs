//! API route definitions

mod health;
mod sse;
mod streams;
mod ticker;
pub mod ws;

use axum::{http::StatusCode, response::Json, Router};
use serde::Serialize;

use crate::AppState;

/// Error body returned by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub(crate) fn error_response(
    status: StatusCode,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Create all API routes
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(streams::routes())
        .merge(health::routes())
}

/// Create client streaming routes (SSE and polling)
pub fn stream_routes() -> Router<AppState> {
    Router::new().merge(sse::routes()).merge(ticker::routes())
}

/// Create WebSocket routes (separate from API)
pub fn ws_routes() -> Router<AppState> {
    ws::routes()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, Response};
    use rust_decimal_macros::dec;
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    use relay_core::{RelayError, RelayResult, TickerSnapshot};
    use relay_services::{RelayConfig, RelayHub, SnapshotSource, SubscriptionCommand};

    use crate::{app, AppState};

    /// Snapshot source that answers for BTCUSDT and fails everything else
    pub struct FixedSource {
        pub calls: AtomicUsize,
    }

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn snapshot(&self, symbol: &str) -> RelayResult<TickerSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if symbol != "BTCUSDT" {
                return Err(RelayError::api("Invalid symbol. (code -1121)"));
            }
            Ok(TickerSnapshot {
                symbol: symbol.to_string(),
                last_price: dec!(64000.5),
                price_change: dec!(-120.25),
                price_change_percent: dec!(-0.19),
                open_price: dec!(64120.75),
                high_price: dec!(64800),
                low_price: dec!(63500),
                volume: dec!(18250.4),
                quote_volume: dec!(1168025600),
                trade_count: 1_204_311,
                event_time: chrono::Utc::now(),
            })
        }
    }

    pub struct TestApp {
        pub state: AppState,
        pub source: Arc<FixedSource>,
        pub commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    }

    pub fn test_app() -> TestApp {
        let config = RelayConfig {
            poll_interval: Duration::from_millis(20),
            ..RelayConfig::default()
        };
        let (hub, commands) = RelayHub::from_config(&config);
        let source = Arc::new(FixedSource {
            calls: AtomicUsize::new(0),
        });
        let snapshots: Arc<dyn SnapshotSource> = source.clone();
        TestApp {
            state: AppState::new(hub, snapshots, config),
            source,
            commands,
        }
    }

    impl TestApp {
        pub async fn get(&self, uri: &str) -> Response<Body> {
            app(self.state.clone())
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap()
        }
    }

    pub async fn body_json(response: Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
