//! Router assembly.

use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::AppState;
use crate::ws;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Live channels. The static segment wins over `{user_id}`.
        .route("/ws/notifications", get(ws::notify::notifications_handler))
        .route("/ws/{user_id}", get(ws::chat::chat_handler))
        // Event producers and history.
        .route("/messages", post(api::send_message).get(api::list_messages))
        .route("/notifications", get(api::list_notifications))
        .route("/notifications/{id}/read", patch(api::mark_notification_read))
        .route("/posts", post(api::create_post))
        .route("/posts/{post_id}/comments", post(api::create_comment))
        .route("/posts/{post_id}/share", post(api::share_post))
        // Health check (useful for K8s liveness probes).
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Liveness probe.
async fn healthz() -> &'static str {
    "ok"
}
