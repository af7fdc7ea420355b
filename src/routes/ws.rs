//! WebSocket handler: dashboard event stream.
//!
//! DESIGN
//! ======
//! On upgrade, registers a subscriber with the hub and enters a `select!`
//! loop:
//! - Hub outbound queue → write to the socket (`Text`, `Ping`, or `Close`)
//! - Client frames → any pong or text marks the subscriber alive
//!
//! The socket is written only from this task; the hub talks to it through
//! the bounded channel.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → `hub.subscribe` queues `init`
//! 2. Events stream until the client closes, the socket errors, or the hub
//!    sends `Close` (liveness eviction or shutdown)
//! 3. Exit → `hub.unsubscribe`

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hub::Outbound;
use crate::state::AppState;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.config.subscriber_queue);
    if !state.hub.subscribe(id, tx) {
        return;
    }
    info!(%id, "ws: subscriber connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Pong(_) | Message::Text(_) | Message::Binary(_) => state.hub.mark_alive(id),
                    Message::Close(_) => break,
                    Message::Ping(_) => {}
                }
            }
            out = rx.recv() => {
                let Some(out) = out else { break };
                let result = match out {
                    Outbound::Text(text) => socket.send(Message::Text(text)).await,
                    Outbound::Ping => socket.send(Message::Ping(Bytes::new())).await,
                    Outbound::Close => {
                        let frame = CloseFrame { code: close_code::AWAY, reason: "server closing".into() };
                        let _ = socket.send(Message::Close(Some(frame))).await;
                        break;
                    }
                };
                if let Err(e) = result {
                    debug!(%id, error = %e, "ws: send failed");
                    break;
                }
            }
        }
    }

    state.hub.unsubscribe(id);
    info!(%id, "ws: subscriber disconnected");
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
