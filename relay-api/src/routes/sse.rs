//! Server-sent-events endpoint
//!
//! `GET /stream?symbol=BTCUSDT`, `GET /stream?stream=btcusdt@aggTrade`, and
//! `...&mode=poll` for the REST-backed fallback.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    routing::get,
    Router,
};
use futures_util::StreamExt;
use tracing::{info, warn};

use relay_services::{live_events, poll_events, StreamMode, StreamQuery, StreamRequest};

use crate::routes::{error_response, ErrorResponse};
use crate::AppState;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

static X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

async fn stream_handler(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Result<impl IntoResponse, (StatusCode, Json<ErrorResponse>)> {
    let request = StreamRequest::from_query(&query).map_err(|e| {
        warn!("[SSE] Rejected request {:?}: {}", query, e);
        error_response(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    info!("[SSE] Opening {:?} stream for {}", request.mode, request.key);
    let events = match request.mode {
        StreamMode::Live => live_events(&state.hub, &request),
        StreamMode::Poll => poll_events(
            &state.hub,
            state.snapshots.clone(),
            &request,
            state.config.poll_interval,
        ),
    };
    let events = events.map(|json| Ok::<_, Infallible>(Event::default().data(json)));

    Ok((
        [
            (header::CACHE_CONTROL, "no-cache"),
            (X_ACCEL_BUFFERING.clone(), "no"),
        ],
        Sse::new(events).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)),
    ))
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/stream", get(stream_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{body_json, test_app};
    use axum::body::Body;
    use axum::http::Response;
    use relay_core::{Envelope, StreamKey};
    use relay_services::SubscriptionCommand;
    use serde_json::json;

    /// Next `data:` payload from an SSE body
    async fn next_data(body: &mut axum::body::BodyDataStream) -> serde_json::Value {
        loop {
            let chunk = tokio::time::timeout(Duration::from_secs(2), body.next())
                .await
                .expect("no SSE event within 2s")
                .expect("SSE body ended")
                .unwrap();
            let text = String::from_utf8(chunk.to_vec()).unwrap();
            if let Some(data) = text.strip_prefix("data: ") {
                return serde_json::from_str(data.trim_end()).unwrap();
            }
        }
    }

    fn header_value<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn test_live_stream_acks_then_forwards_and_detaches_on_abort() {
        let mut app = test_app();
        let key: StreamKey = "ethusdt@ticker".parse().unwrap();

        let response = app.get("/stream?symbol=ETHUSDT").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, "content-type"), "text/event-stream");
        assert_eq!(header_value(&response, "cache-control"), "no-cache");
        assert_eq!(header_value(&response, "x-accel-buffering"), "no");

        let mut body = response.into_body().into_data_stream();
        let ack = next_data(&mut body).await;
        assert_eq!(ack, json!({"type": "connected", "stream": "ethusdt"}));
        assert_eq!(app.state.hub.registry().ref_count(&key), 1);
        assert_eq!(
            app.commands.try_recv().unwrap(),
            SubscriptionCommand::Subscribe(key.clone())
        );

        app.state
            .hub
            .publish(Envelope::new(key.clone(), json!({"c": "3150.20"})));
        let data = next_data(&mut body).await;
        assert_eq!(data["type"], "data");
        assert_eq!(data["stream"], "ethusdt@ticker");
        assert_eq!(data["data"]["c"], "3150.20");

        drop(body);
        assert_eq!(app.state.hub.registry().ref_count(&key), 0);
        assert_eq!(
            app.commands.try_recv().unwrap(),
            SubscriptionCommand::Unsubscribe(key)
        );
    }

    #[tokio::test]
    async fn test_named_stream_acks_canonical_name() {
        let app = test_app();
        let response = app.get("/stream?stream=BTCUSDT@depth20@100ms").await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        let ack = next_data(&mut body).await;
        assert_eq!(ack["stream"], "btcusdt@depth20@100ms");
    }

    #[tokio::test]
    async fn test_poll_mode_streams_snapshots_without_registry() {
        let app = test_app();
        let response = app.get("/stream?symbol=BTCUSDT&mode=poll").await;
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body().into_data_stream();
        assert_eq!(next_data(&mut body).await["stream"], "btcusdt");
        let first = next_data(&mut body).await;
        assert_eq!(first["stream"], "btcusdt@ticker");
        assert_eq!(first["data"]["symbol"], "BTCUSDT");
        let second = next_data(&mut body).await;
        assert_eq!(second["data"]["last_price"], "64000.5");

        assert!(app.state.hub.registry().is_empty());
    }

    #[tokio::test]
    async fn test_bad_queries_are_rejected() {
        let app = test_app();
        for uri in [
            "/stream",
            "/stream?symbol=",
            "/stream?stream=btcusdt@nonsense",
            "/stream?symbol=BTCUSDT&mode=turbo",
            "/stream?stream=btcusdt@aggTrade&mode=poll",
        ] {
            let response = app.get(uri).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", uri);
            assert!(body_json(response).await["error"].is_string());
        }
        assert!(app.state.hub.registry().is_empty());
    }
}
