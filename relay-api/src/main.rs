//! Market Data Relay API Server
//!
//! Holds one upstream exchange connection and fans it out to browser
//! clients over WebSocket, SSE and a polling fallback.

mod routes;

use axum::{
    http::{header, Method},
    Router,
};
use relay_binance::{BinanceConnector, BinanceRestClient, UpstreamTarget};
use relay_services::{
    LiveSocketBridge, LiveSocketConfig, RelayConfig, RelayHub, SnapshotSource, Supervisor,
    SupervisorConfig,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<RelayHub>,
    pub bridge: LiveSocketBridge,
    /// REST snapshots for polling clients
    pub snapshots: Arc<dyn SnapshotSource>,
    pub config: Arc<RelayConfig>,
}

impl AppState {
    pub fn new(hub: Arc<RelayHub>, snapshots: Arc<dyn SnapshotSource>, config: RelayConfig) -> Self {
        let bridge = LiveSocketBridge::new(Arc::clone(&hub), LiveSocketConfig::from(&config));
        Self {
            hub,
            bridge,
            snapshots,
            config: Arc::new(config),
        }
    }
}

/// Build the full router
pub fn app(state: AppState) -> Router {
    // Browsers connect from any origin; the relay carries public data only
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .nest("/api", routes::api_routes())
        .merge(routes::stream_routes())
        .merge(routes::ws_routes())
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env.local file
    if let Err(e) = dotenvy::from_filename(".env.local") {
        // Not an error if the file doesn't exist
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env.local: {}", e);
        }
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,relay_api=debug,relay_services=debug")),
        )
        .init();

    info!("Starting Market Data Relay");

    let config = RelayConfig::from_env()?;
    info!(
        "Upstream {} (REST {}), consumer queue {}, stale after {:?}",
        config.upstream_url, config.rest_url, config.consumer_queue, config.stale_after
    );

    // Hub first: the supervisor owns the other end of its command channel
    let (hub, commands) = RelayHub::from_config(&config);

    let connector = BinanceConnector::new(UpstreamTarget::new(config.upstream_url.clone()));
    let supervisor = Supervisor::new(
        connector,
        Arc::clone(&hub),
        commands,
        SupervisorConfig::from(&config),
    )
    .spawn();

    let rest_client = BinanceRestClient::with_base_url(config.rest_url.clone())?;

    let port = config.server_port;
    let state = AppState::new(hub, Arc::new(rest_client), config);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve(listener, state, shutdown_signal()).await?;

    info!("HTTP server stopped, closing upstream connection");
    supervisor.shutdown().await;

    Ok(())
}

/// Serve until `signal` resolves, then end every downstream stream so the
/// graceful shutdown is not held open by long-lived responses
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    state: AppState,
    signal: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let hub = Arc::clone(&state.hub);
    axum::serve(listener, app(state))
        .with_graceful_shutdown(async move {
            signal.await;
            hub.shutdown();
        })
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        // Without a signal handler, run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::test_app;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn test_graceful_shutdown_ends_open_sse_streams() {
        let app = test_app();
        let hub = Arc::clone(&app.state.hub);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, app.state.clone(), async move {
            let _ = stop_rx.await;
        }));

        let mut response = reqwest::get(format!("http://{}/stream?symbol=ETHUSDT", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let ack = response.chunk().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&ack).contains(r#""type":"connected""#));
        assert_eq!(hub.registry().len(), 1);

        stop_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(3), server)
            .await
            .expect("server still running with an SSE client connected")
            .unwrap()
            .unwrap();

        // The body was finished, not cut off
        while let Some(_chunk) = response.chunk().await.unwrap() {}
        assert!(hub.registry().is_empty());
    }
}
