//! Connection registry — user id → the one live channel for that user.
//!
//! One registry exists per channel kind (chat, notifications). Each entry is
//! a [`ConnectionHandle`]: the sending half of the connection's outbound
//! queue plus a close signal. The socket itself stays with the task that
//! accepted it; the registry only routes to it.
//!
//! Every operation is a single atomic step on the map's per-key lock, so a
//! user never has two entries and readers never see a half-applied swap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Why the server ended a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// A newer connection for the same user took over.
    Superseded,
    /// Outbound writes stalled or failed.
    DeliveryFailed,
    /// Process is stopping.
    Shutdown,
}

impl CloseReason {
    pub fn close_frame(self) -> CloseFrame {
        let (code, reason) = match self {
            CloseReason::Superseded => (4000, "replaced by a newer connection"),
            CloseReason::DeliveryFailed => (1011, "delivery failed"),
            CloseReason::Shutdown => (1001, "server shutting down"),
        };
        CloseFrame {
            code,
            reason: reason.into(),
        }
    }
}

struct CloseSignal {
    notify: Notify,
    reason: OnceLock<CloseReason>,
}

/// Write side of one live connection. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionHandle {
    conn_id: u64,
    tx: mpsc::Sender<Message>,
    close: Arc<CloseSignal>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("conn_id", &self.conn_id)
            .field("closed", &self.close_reason())
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("outbound queue full for {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::Sender<Message>) -> Self {
        Self {
            conn_id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            tx,
            close: Arc::new(CloseSignal {
                notify: Notify::new(),
                reason: OnceLock::new(),
            }),
        }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Queue a frame, waiting at most `timeout` for queue space.
    pub async fn send(&self, msg: Message, timeout: Duration) -> Result<(), SendError> {
        self.tx.send_timeout(msg, timeout).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => SendError::Timeout(timeout),
            SendTimeoutError::Closed(_) => SendError::Closed,
        })
    }

    /// Queue a frame only if there is room right now.
    pub fn try_send(&self, msg: Message) -> bool {
        self.tx.try_send(msg).is_ok()
    }

    /// Ask the owning task to close. The first reason wins.
    pub fn close(&self, reason: CloseReason) {
        if self.close.reason.set(reason).is_ok() {
            self.close.notify.notify_one();
        }
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close.reason.get().copied()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) -> CloseReason {
        loop {
            if let Some(reason) = self.close_reason() {
                return reason;
            }
            self.close.notify.notified().await;
        }
    }
}

pub struct ConnectionRegistry {
    /// Channel kind, for logs.
    name: &'static str,
    inner: DashMap<i32, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inner: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Insert or replace the entry for `user_id`. A replaced handle is told
    /// to close and returned.
    pub fn register(&self, user_id: i32, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let conn_id = handle.conn_id;
        let previous = self.inner.insert(user_id, handle);
        match &previous {
            Some(old) => {
                old.close(CloseReason::Superseded);
                info!(
                    registry = self.name,
                    user_id,
                    conn_id,
                    old_conn_id = old.conn_id,
                    "connection superseded"
                );
            }
            None => debug!(registry = self.name, user_id, conn_id, "connection registered"),
        }
        previous
    }

    /// Remove the entry for `user_id` if it still belongs to `conn_id`.
    /// Absent or already replaced entries are left alone.
    pub fn unregister(&self, user_id: i32, conn_id: u64) -> bool {
        let removed = self
            .inner
            .remove_if(&user_id, |_, h| h.conn_id == conn_id)
            .is_some();
        if removed {
            debug!(registry = self.name, user_id, conn_id, "connection unregistered");
        }
        removed
    }

    pub fn lookup(&self, user_id: i32) -> Option<ConnectionHandle> {
        self.inner.get(&user_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Close and drop every entry.
    pub fn close_all(&self, reason: CloseReason) {
        self.inner.retain(|_, handle| {
            handle.close(reason);
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::Receiver<Message>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn second_register_supersedes_first() {
        let registry = ConnectionRegistry::new("chat");
        let (tab_a, _rx_a) = handle();
        let (tab_b, _rx_b) = handle();

        assert!(registry.register(7, tab_a.clone()).is_none());
        let old = registry.register(7, tab_b.clone()).unwrap();

        assert_eq!(old.conn_id(), tab_a.conn_id());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup(7).unwrap().conn_id(), tab_b.conn_id());
        assert_eq!(tab_a.close_reason(), Some(CloseReason::Superseded));
        assert_eq!(tab_b.close_reason(), None);
    }

    #[test]
    fn stale_unregister_keeps_newer_entry() {
        let registry = ConnectionRegistry::new("chat");
        let (tab_a, _rx_a) = handle();
        let (tab_b, _rx_b) = handle();
        registry.register(7, tab_a.clone());
        registry.register(7, tab_b.clone());

        assert!(!registry.unregister(7, tab_a.conn_id()));
        assert_eq!(registry.lookup(7).unwrap().conn_id(), tab_b.conn_id());

        assert!(registry.unregister(7, tab_b.conn_id()));
        assert!(registry.lookup(7).is_none());
        assert!(!registry.unregister(7, tab_b.conn_id()));
    }

    #[test]
    fn close_all_empties_registry() {
        let registry = ConnectionRegistry::new("notifications");
        let (a, _rx_a) = handle();
        let (b, _rx_b) = handle();
        registry.register(1, a.clone());
        registry.register(2, b.clone());

        registry.close_all(CloseReason::Shutdown);

        assert!(registry.is_empty());
        assert_eq!(a.close_reason(), Some(CloseReason::Shutdown));
        assert_eq!(b.close_reason(), Some(CloseReason::Shutdown));
    }

    #[tokio::test]
    async fn closed_resolves_after_close() {
        let (h, _rx) = handle();
        let waiter = tokio::spawn({
            let h = h.clone();
            async move { h.closed().await }
        });
        h.close(CloseReason::DeliveryFailed);
        h.close(CloseReason::Shutdown);
        assert_eq!(waiter.await.unwrap(), CloseReason::DeliveryFailed);
    }

    #[tokio::test]
    async fn send_times_out_on_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let h = ConnectionHandle::new(tx);
        h.send(Message::Text("one".into()), Duration::from_millis(10))
            .await
            .unwrap();
        let err = h
            .send(Message::Text("two".into()), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SendError::Timeout(_)));
    }

    #[tokio::test]
    async fn concurrent_registers_leave_one_entry() {
        let registry = Arc::new(ConnectionRegistry::new("chat"));
        let mut tasks = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..32 {
            let (h, rx) = handle();
            receivers.push(rx);
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register(42, h);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(registry.len(), 1);
        let winner = registry.lookup(42).unwrap();
        assert_eq!(winner.close_reason(), None);
    }
}
