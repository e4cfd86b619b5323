//! Messaging channel — `GET /ws/{user_id}?token=…`.
//!
//! Chat frames go through the same durable path as `POST /messages`
//! (Message row, then push); typing indicators are forwarded without
//! persistence; read frames flag the message and notify its sender.
//! A frame that fails to decode or to apply is answered with an `error`
//! frame and the loop carries on.

use std::sync::Arc;

use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::extract::ws::WebSocket;
use axum::response::Response;
use tracing::{debug, warn};

use super::{authenticate, reject, Session, WsAuthQuery};
use crate::auth::UserIdentity;
use crate::error::CivicError;
use crate::events;
use crate::state::AppState;
use crate::types::{ClientFrame, ServerEvent, TypingPush};

/// Axum handler for GET /ws/{user_id}. Upgrades to WebSocket.
pub async fn chat_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<i32>,
    Query(query): Query<WsAuthQuery>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match authenticate(&state, query.token.as_deref(), Some(user_id)).await {
        Ok(identity) => ws.on_upgrade(move |socket| handle_socket(socket, state, identity)),
        Err(e) => reject(ws, "chat", e),
    }
}

/// Per-connection loop.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, identity: UserIdentity) {
    let mut session = Session::open(
        socket,
        Arc::clone(state.chat.registry()),
        identity.id,
        state.config.outbound_buffer,
        state.config.push_timeout,
    );

    while let Some(text) = session.next_text().await {
        let frame = match ClientFrame::decode(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(user_id = session.user_id(), "dropping frame: {e}");
                session
                    .reply(&ServerEvent::error("invalid_frame", e.to_string()))
                    .await;
                continue;
            }
        };

        if let Err(e) = handle_frame(frame, &identity, &state).await {
            warn!(user_id = session.user_id(), "frame error: {e}");
            session.reply(&ServerEvent::error(e.code(), e.to_string())).await;
        }
    }

    session.close().await;
}

async fn handle_frame(
    frame: ClientFrame,
    sender: &UserIdentity,
    state: &AppState,
) -> Result<(), CivicError> {
    match frame {
        ClientFrame::Typing { recipient_id } => {
            state
                .chat
                .push(
                    recipient_id,
                    &ServerEvent::Typing(TypingPush {
                        sender_id: sender.id,
                    }),
                )
                .await;
        }
        ClientFrame::Chat(chat) => {
            events::message_sent(
                state.store.as_ref(),
                &state.chat,
                &state.notifications,
                sender,
                &chat.recipient,
                &chat.content,
            )
            .await?;
        }
        ClientFrame::Read { message_id } => {
            events::message_read(state.store.as_ref(), &state.chat, sender, message_id).await?;
        }
    }
    Ok(())
}
