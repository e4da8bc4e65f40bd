//! Graceful shutdown signal handling.

use std::time::Duration;

use tokio::signal::ctrl_c;
#[cfg(unix)]
use tokio::signal::unix;

use crate::TRACING_TARGET_SERVER_SHUTDOWN;

/// Waits for `SIGINT` (Ctrl+C) or, on Unix, `SIGTERM`, then returns so the
/// caller can start its graceful-shutdown window.
pub async fn shutdown_signal(shutdown_timeout: Duration) {
    let ctrl_c = async {
        if let Err(error) = ctrl_c().await {
            tracing::error!(target: TRACING_TARGET_SERVER_SHUTDOWN, %error, "failed to install Ctrl+C handler");
        } else {
            tracing::info!(target: TRACING_TARGET_SERVER_SHUTDOWN, "received Ctrl+C, initiating graceful shutdown");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match unix::signal(unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
                tracing::info!(target: TRACING_TARGET_SERVER_SHUTDOWN, "received SIGTERM, initiating graceful shutdown");
            }
            Err(error) => {
                tracing::error!(target: TRACING_TARGET_SERVER_SHUTDOWN, %error, "failed to install SIGTERM handler");
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!(
        target: TRACING_TARGET_SERVER_SHUTDOWN,
        timeout_secs = shutdown_timeout.as_secs(),
        "graceful shutdown initiated"
    );
}
