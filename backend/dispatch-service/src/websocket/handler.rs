use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tracing::debug;

use crate::state::AppState;

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

/// Bridge one connection to the hub: push every broadcast out, drain client
/// frames for close detection. Clients do not send events upstream.
async fn handle_socket(state: AppState, socket: WebSocket) {
    let (id, mut rx) = state.hub.subscribe().await;
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(payload) => {
                        if sender.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    // Ping/pong is handled by the framework; other frames ignored
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(id).await;
    debug!(subscriber = %id, "websocket closed");
}
