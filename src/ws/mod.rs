//! Live channels.
//!
//! Flow per connection:
//! 1. Resolve `?token=` to an identity before upgrading
//! 2. Reject (upgrade, send 1008 close) or accept
//! 3. Register the outbound queue in the channel's registry
//! 4. Read loop until the client leaves or the server closes us
//! 5. Unregister (only our own entry) and close

pub mod chat;
pub mod notify;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, Utf8Bytes, WebSocket};
use axum::extract::WebSocketUpgrade;
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::auth::UserIdentity;
use crate::error::AuthError;
use crate::registry::{CloseReason, ConnectionHandle, ConnectionRegistry};
use crate::state::AppState;
use crate::types::ServerEvent;

/// How long the writer gets to flush the final close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// `?token=<jwt>`. Optional so a missing token closes with 1008 instead of
/// failing extraction.
#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

/// Unauthenticated → identity-checked. `path_user` is the user id bound in
/// the route, if the channel has one.
pub(crate) async fn authenticate(
    state: &AppState,
    token: Option<&str>,
    path_user: Option<i32>,
) -> Result<UserIdentity, AuthError> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    let identity = state.auth.resolve_identity(token).await?;

    if path_user.is_some_and(|id| id != identity.id) {
        return Err(AuthError::UserMismatch);
    }
    let active = state.store.is_user_active(identity.id).await.map_err(|e| {
        warn!(user_id = identity.id, "activity check failed: {e}");
        AuthError::Lookup
    })?;
    if !active {
        return Err(AuthError::Suspended);
    }
    Ok(identity)
}

/// Upgrade only to deliver the close frame; nothing is registered.
pub(crate) fn reject(ws: WebSocketUpgrade, channel: &'static str, err: AuthError) -> Response {
    warn!(
        channel,
        reason = %err,
        authentication = err.is_authentication_failure(),
        "websocket handshake rejected"
    );
    ws.on_upgrade(move |mut socket| async move {
        let _ = socket.send(Message::Close(Some(err.close_frame()))).await;
    })
}

/// One accepted, registered connection.
pub(crate) struct Session {
    user_id: i32,
    handle: ConnectionHandle,
    receiver: SplitStream<WebSocket>,
    writer: JoinHandle<()>,
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
}

impl Session {
    /// Split the socket, start the writer and register. Supersedes any
    /// earlier connection of the same user in this registry.
    pub(crate) fn open(
        socket: WebSocket,
        registry: Arc<ConnectionRegistry>,
        user_id: i32,
        buffer: usize,
        timeout: Duration,
    ) -> Self {
        let (sink, receiver) = socket.split();
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = ConnectionHandle::new(tx);
        let writer = tokio::spawn(writer_task(sink, rx, handle.clone()));

        registry.register(user_id, handle.clone());
        info!(
            registry = registry.name(),
            user_id,
            conn_id = handle.conn_id(),
            "channel open"
        );

        Self {
            user_id,
            handle,
            receiver,
            writer,
            registry,
            timeout,
        }
    }

    /// Next text frame, or `None` once the connection is over: client close,
    /// transport error, or a server-side close (supersession, failed delivery,
    /// shutdown). Control and binary frames are skipped.
    pub(crate) async fn next_text(&mut self) -> Option<Utf8Bytes> {
        loop {
            tokio::select! {
                reason = self.handle.closed() => {
                    debug!(user_id = self.user_id, ?reason, "server-side close");
                    return None;
                }
                msg = self.receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => return Some(text),
                    Some(Ok(Message::Close(frame))) => {
                        debug!(user_id = self.user_id, ?frame, "client initiated close");
                        return None;
                    }
                    Some(Ok(_)) => { /* ping/pong handled by axum, binary ignored */ }
                    Some(Err(e)) => {
                        warn!(user_id = self.user_id, "ws recv error: {e}");
                        return None;
                    }
                    None => return None,
                }
            }
        }
    }

    /// Send straight to this connection, bypassing the registry.
    pub(crate) async fn reply(&self, event: &ServerEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(user_id = self.user_id, "serialize error: {e}");
                return;
            }
        };
        if let Err(e) = self
            .handle
            .send(Message::Text(json.into()), self.timeout)
            .await
        {
            warn!(user_id = self.user_id, "reply failed: {e}");
            self.handle.close(CloseReason::DeliveryFailed);
        }
    }

    pub(crate) fn user_id(&self) -> i32 {
        self.user_id
    }

    /// Open → closed. Drops our registry entry (if still ours) and sends a
    /// close frame carrying the server-side reason, if there was one.
    pub(crate) async fn close(self) {
        let Session {
            user_id,
            handle,
            writer,
            registry,
            ..
        } = self;

        registry.unregister(user_id, handle.conn_id());

        let frame = handle.close_reason().map(CloseReason::close_frame);
        if handle.try_send(Message::Close(frame)) {
            let abort = writer.abort_handle();
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer).await.is_err() {
                abort.abort();
            }
        } else {
            writer.abort();
        }

        info!(
            registry = registry.name(),
            user_id,
            conn_id = handle.conn_id(),
            reason = ?handle.close_reason(),
            "channel closed"
        );
    }
}

/// Owns the sink. Forwards queued frames until a close frame goes out or a
/// write fails; a failed data write closes the session.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    handle: ConnectionHandle,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if let Err(e) = sink.send(msg).await {
            debug!(conn_id = handle.conn_id(), "ws send error: {e}");
            if !closing {
                handle.close(CloseReason::DeliveryFailed);
            }
            break;
        }
        if closing {
            break;
        }
    }
}
