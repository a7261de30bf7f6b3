//! Operator view of active upstream subscriptions

use axum::{extract::State, response::Json, routing::get, Router};
use serde::Serialize;

use relay_services::{DispatcherStats, Subscription};

use crate::AppState;

#[derive(Debug, Serialize)]
struct StreamsResponse {
    streams: Vec<Subscription>,
    count: usize,
    dispatcher: DispatcherStats,
}

/// GET /api/streams
async fn list_streams(State(state): State<AppState>) -> Json<StreamsResponse> {
    let streams = state.hub.registry().subscriptions();
    Json(StreamsResponse {
        count: streams.len(),
        streams,
        dispatcher: state.hub.dispatcher().stats(),
    })
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/streams", get(list_streams))
}
