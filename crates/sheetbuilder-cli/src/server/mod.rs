//! HTTP server startup and graceful shutdown.

mod shutdown;

use axum::Router;
pub(crate) use shutdown::shutdown_signal;
use tokio::net::TcpListener;

use crate::config::ServerConfig;
use crate::TRACING_TARGET_SERVER_STARTUP;

/// Binds a `TcpListener` and serves `app` until a shutdown signal arrives,
/// then waits (up to `config.shutdown_timeout()`) for in-flight requests to
/// finish.
pub async fn serve(app: Router, config: ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(target: TRACING_TARGET_SERVER_STARTUP, %addr, "server listening");

    let shutdown_timeout = config.shutdown_timeout();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_timeout))
        .await?;

    Ok(())
}
