//! Delivery dispatcher: best-effort live push on top of a registry.
//!
//! `push` never fails from the caller's point of view. An offline user is
//! the normal case; a stalled or broken channel is logged, closed and pruned
//! from the registry. The durable row the caller already wrote stands.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::registry::{CloseReason, ConnectionRegistry};
use crate::types::ServerEvent;

/// What happened to one push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// No live channel for the user.
    Offline,
    /// Channel present but the write failed or stalled; entry pruned.
    Dropped,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ConnectionRegistry>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub async fn push(&self, user_id: i32, event: &ServerEvent) -> Delivery {
        let Some(handle) = self.registry.lookup(user_id) else {
            debug!(
                registry = self.registry.name(),
                user_id,
                kind = event.kind(),
                "user offline, push skipped"
            );
            return Delivery::Offline;
        };

        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(user_id, kind = event.kind(), "serialize error: {e}");
                return Delivery::Dropped;
            }
        };

        match handle.send(Message::Text(json.into()), self.timeout).await {
            Ok(()) => {
                debug!(
                    registry = self.registry.name(),
                    user_id,
                    conn_id = handle.conn_id(),
                    kind = event.kind(),
                    "pushed"
                );
                Delivery::Delivered
            }
            Err(e) => {
                warn!(
                    registry = self.registry.name(),
                    user_id,
                    conn_id = handle.conn_id(),
                    kind = event.kind(),
                    "push failed, dropping connection: {e}"
                );
                self.registry.unregister(user_id, handle.conn_id());
                handle.close(CloseReason::DeliveryFailed);
                Delivery::Dropped
            }
        }
    }

    /// Push to several users concurrently. Each push is independent; the
    /// outcomes come back in input order.
    pub async fn fanout(&self, pushes: &[(i32, ServerEvent)]) -> Vec<Delivery> {
        join_all(
            pushes
                .iter()
                .map(|(user_id, event)| self.push(*user_id, event)),
        )
        .await
    }
}
