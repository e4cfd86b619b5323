//! Notification channel — `GET /ws/notifications?token=…`.
//!
//! Push-only. Inbound frames are read solely to notice the client leaving
//! and are otherwise discarded.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::Response;

use super::{authenticate, reject, Session, WsAuthQuery};
use crate::auth::UserIdentity;
use crate::state::AppState;

/// Axum handler for GET /ws/notifications. Upgrades to WebSocket.
pub async fn notifications_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsAuthQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match authenticate(&state, query.token.as_deref(), None).await {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        Err(e) => reject(ws, "notifications", e),
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: UserIdentity) {
    let mut session = Session::open(
        socket,
        Arc::clone(state.notifications.registry()),
        identity.id,
        state.config.outbound_buffer,
        state.config.push_timeout,
    );

    // Keepalive only.
    while session.next_text().await.is_some() {}

    session.close().await;
}
