// WebSocket handler for session event streaming.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use serde_json::json;
use uuid::Uuid;

use super::{load_session, AppState};
use crate::metrics;
use crate::session::SessionHandle;

/// WebSocket upgrade handler for one session's round events.
pub async fn ws_session(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Response {
    match load_session(&state, id).await {
        Ok(session) => ws
            .on_upgrade(move |socket| handle_ws(socket, session))
            .into_response(),
        Err(r) => r,
    }
}

async fn send_text(socket: &mut WebSocket, text: String) -> bool {
    if socket.send(Message::Text(text.into())).await.is_err() {
        return false;
    }
    metrics::WEBSOCKET_MESSAGES_SENT_TOTAL.inc();
    true
}

async fn handle_ws(mut socket: WebSocket, session: SessionHandle) {
    metrics::CONNECTED_WEBSOCKETS.inc();
    let mut rx = session.subscribe();

    // Snapshot first so a reconnecting client can redraw before the next tick.
    let snapshot = json!({ "type": "snapshot", "session": session.view().await }).to_string();
    if send_text(&mut socket, snapshot).await {
        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(msg) => {
                            if !send_text(&mut socket, msg).await {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(session = %session.id(), "WebSocket client lagged, skipped {n} messages");
                        }
                    }
                }
                // Clients only listen; their messages are ignored.
                result = socket.recv() => {
                    match result {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }
    }

    metrics::CONNECTED_WEBSOCKETS.dec();
}
