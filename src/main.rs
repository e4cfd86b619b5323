//! civicd — civic network real-time server.

use std::sync::Arc;

use civicd::config::Config;
use civicd::db::PgStore;
use civicd::state::AppState;
use civicd::{lifecycle, routes};
use tracing::info;

#[tokio::main]
async fn main() {
    // Load .env if present (local dev).
    let _ = dotenvy::dotenv();

    let config = Config::from_env();

    // Tracing.
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(true)
        .init();

    info!("civicd starting");
    info!(listen = %config.listen_addr);

    // ── Postgres ────────────────────────────────────────────
    let store = PgStore::connect(&config.database_url, config.db_max_connections)
        .await
        .expect("failed to connect to Postgres");

    info!("database ready");

    // ── Shared state ────────────────────────────────────────
    let state = AppState::new(Arc::new(store), config.clone());

    // ── Routes ──────────────────────────────────────────────
    let app = routes::build_router(Arc::clone(&state));

    // ── Bind & serve ────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind");

    info!(addr = %config.listen_addr, "civicd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(lifecycle::shutdown_signal(state))
        .await
        .expect("server error");
}
