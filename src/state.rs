//! Shared server state: persistence, auth and the two live registries.

use std::sync::Arc;

use crate::auth::AuthVerifier;
use crate::config::Config;
use crate::db::Store;
use crate::dispatch::Dispatcher;
use crate::registry::{CloseReason, ConnectionRegistry};

/// Shared state accessible from all handlers.
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub auth: AuthVerifier,
    /// Live chat channels (`/ws/{user_id}`).
    pub chat: Dispatcher,
    /// Live notification channels (`/ws/notifications`).
    pub notifications: Dispatcher,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, config: Config) -> Arc<Self> {
        let auth = AuthVerifier::new(
            &config.secret_key,
            config.access_token_expire_minutes,
            Arc::clone(&store),
        );
        let chat = Dispatcher::new(
            Arc::new(ConnectionRegistry::new("chat")),
            config.push_timeout,
        );
        let notifications = Dispatcher::new(
            Arc::new(ConnectionRegistry::new("notifications")),
            config.push_timeout,
        );

        Arc::new(Self {
            store,
            auth,
            chat,
            notifications,
            config,
        })
    }

    /// Close every live channel. Called once at shutdown.
    pub fn close_all_connections(&self) {
        self.chat.registry().close_all(CloseReason::Shutdown);
        self.notifications.registry().close_all(CloseReason::Shutdown);
    }
}
