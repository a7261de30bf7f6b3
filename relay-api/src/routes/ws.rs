//! WebSocket route handler
//!
//! Handles WebSocket upgrade and bridges the axum socket onto the relay's
//! live-socket handler through a pair of channels.

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use relay_core::SocketFrame;

use crate::AppState;

/// Frames buffered in each direction between the socket and the handler
const BRIDGE_CAPACITY: usize = 100;

/// Create WebSocket routes
pub fn routes() -> Router<AppState> {
    Router::new().route("/ws", get(ws_handler))
}

/// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

fn from_axum(msg: Message) -> SocketFrame {
    match msg {
        Message::Text(text) => SocketFrame::Text(text.as_str().to_owned()),
        Message::Binary(data) => SocketFrame::Binary(data.to_vec()),
        Message::Ping(data) => SocketFrame::Ping(data.to_vec()),
        Message::Pong(data) => SocketFrame::Pong(data.to_vec()),
        Message::Close(_) => SocketFrame::Close,
    }
}

fn to_axum(frame: SocketFrame) -> Message {
    match frame {
        SocketFrame::Text(text) => Message::Text(text.into()),
        SocketFrame::Binary(data) => Message::Binary(Bytes::from(data)),
        SocketFrame::Ping(data) => Message::Ping(Bytes::from(data)),
        SocketFrame::Pong(data) => Message::Pong(Bytes::from(data)),
        SocketFrame::Close => Message::Close(None),
    }
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (in_tx, in_rx) = mpsc::channel::<SocketFrame>(BRIDGE_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<SocketFrame>(BRIDGE_CAPACITY);

    // Task: Forward frames from the client into the handler
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let frame = from_axum(msg);
            let closing = frame == SocketFrame::Close;
            if in_tx.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    // Task: Write handler output to the client; ends once the handler drops
    // its sender or the client goes away
    let mut send_task = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let closing = frame == SocketFrame::Close;
            if sender.send(to_axum(frame)).await.is_err() || closing {
                break;
            }
        }
    });

    state
        .bridge
        .handle_connection(ReceiverStream::new(in_rx), out_tx)
        .await;

    // Give the close frame a bounded chance to go out; a stalled peer
    // must not pin this task
    recv_task.abort();
    let grace = state.config.client_pong_timeout;
    match tokio::time::timeout(grace, &mut send_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("WebSocket writer ended abnormally: {}", e),
        Err(_) => {
            debug!("WebSocket writer still blocked after {:?}, aborting", grace);
            send_task.abort();
        }
    }
}
