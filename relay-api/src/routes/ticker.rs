//! Polling fallback: one REST ticker snapshot per request

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::{debug, warn};

use relay_core::{Channel, RelayError, StreamKey, TickerSnapshot};

use crate::routes::{error_response, ErrorResponse};
use crate::AppState;

#[derive(Debug, Deserialize)]
struct TickerQuery {
    symbol: Option<String>,
}

/// GET /ticker-stream?symbol=BTCUSDT
async fn ticker_snapshot(
    State(state): State<AppState>,
    Query(query): Query<TickerQuery>,
) -> Result<Json<TickerSnapshot>, (StatusCode, Json<ErrorResponse>)> {
    let symbol = query
        .symbol
        .ok_or_else(|| error_response(StatusCode::BAD_REQUEST, "'symbol' is required"))?;
    let key = StreamKey::new(&symbol, Channel::Ticker)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))?;

    match state.snapshots.snapshot(key.symbol()).await {
        Ok(snapshot) => {
            debug!("[Poller] {}", snapshot.summary());
            Ok(Json(snapshot))
        }
        Err(e @ RelayError::InvalidStream(_)) => {
            Err(error_response(StatusCode::BAD_REQUEST, e.to_string()))
        }
        Err(e) => {
            warn!("[Poller] Snapshot for {} failed: {}", key.symbol(), e);
            Err(error_response(StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/ticker-stream", get(ticker_snapshot))
}
