//! Process lifecycle: wait for a stop signal, then tear down the live
//! registries so every open channel gets a 1001 close.

use std::sync::Arc;

use tracing::info;

use crate::state::AppState;

/// Resolves on Ctrl-C or SIGTERM, after all channels have been told to close.
pub async fn shutdown_signal(state: Arc<AppState>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("ctrl-c handler error: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("SIGTERM handler error: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!(
        chat = state.chat.registry().len(),
        notifications = state.notifications.registry().len(),
        "shutdown requested, closing live channels"
    );
    state.close_all_connections();
}
