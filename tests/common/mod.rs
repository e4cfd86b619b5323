//! Shared harness: a full civicd router on an ephemeral port, backed by the
//! in-memory store.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use civicd::config::Config;
use civicd::db::{MemoryStore, Role, UserRow};
use civicd::routes::build_router;
use civicd::state::AppState;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
}

impl TestServer {
    pub async fn start() -> Self {
        let store = Arc::new(MemoryStore::new());
        let state = AppState::new(store.clone(), Config::for_tests("integration-secret"));
        let app = build_router(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state, store }
    }

    pub fn user(&self, name: &str) -> (UserRow, String) {
        self.user_with(name, Role::Citizen, "Kampala Central")
    }

    pub fn user_with(&self, name: &str, role: Role, constituency: &str) -> (UserRow, String) {
        let user = self.store.add_user(name, role, constituency);
        let token = self.state.auth.issue_token(user.id).unwrap();
        (user, token)
    }

    pub fn http(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn connect(&self, path_and_query: &str) -> Client {
        let url = format!("ws://{}{path_and_query}", self.addr);
        let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        ws
    }

    /// Open `/ws/{id}` and wait until the registry points at it.
    pub async fn connect_chat(&self, user_id: i32, token: &str) -> Client {
        let before = self.state.chat.registry().lookup(user_id).map(|h| h.conn_id());
        let ws = self.connect(&format!("/ws/{user_id}?token={token}")).await;
        let registry = self.state.chat.registry();
        wait_until(|| {
            registry
                .lookup(user_id)
                .is_some_and(|h| Some(h.conn_id()) != before)
        })
        .await;
        ws
    }

    /// Open `/ws/notifications` and wait until it is registered.
    pub async fn connect_notifications(&self, user_id: i32, token: &str) -> Client {
        let before = self
            .state
            .notifications
            .registry()
            .lookup(user_id)
            .map(|h| h.conn_id());
        let ws = self.connect(&format!("/ws/notifications?token={token}")).await;
        let registry = self.state.notifications.registry();
        wait_until(|| {
            registry
                .lookup(user_id)
                .is_some_and(|h| Some(h.conn_id()) != before)
        })
        .await;
        ws
    }
}

pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not met in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Next JSON text frame, skipping control frames. Panics on close or timeout.
pub async fn next_json(ws: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("ws error");
        match msg {
            Message::Text(_) => return serde_json::from_str(msg.to_text().unwrap()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

/// Close code of the next close frame.
pub async fn next_close_code(ws: &mut Client) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out waiting for close");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected close frame, got {other:?}"),
        }
    }
}

/// Assert nothing but control frames arrive for a short while.
pub async fn assert_silent(ws: &mut Client) {
    let waited = tokio::time::timeout(Duration::from_millis(200), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                other => return other,
            }
        }
    })
    .await;
    assert!(waited.is_err(), "expected no frame, got {waited:?}");
}

pub async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}
