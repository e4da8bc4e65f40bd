#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod config;
mod server;

use std::process;

use anyhow::Context;
use clap::Parser;
use sheetbuilder_server::ServiceState;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::Cli;

/// Tracing target for process startup/shutdown events.
pub const TRACING_TARGET_SERVER_STARTUP: &str = "sheetbuilder_cli::server::startup";
/// Tracing target for graceful shutdown events.
pub const TRACING_TARGET_SERVER_SHUTDOWN: &str = "sheetbuilder_cli::server::shutdown";
/// Tracing target for configuration logging.
pub const TRACING_TARGET_CONFIG: &str = "sheetbuilder_cli::config";

#[tokio::main]
async fn main() {
    let Err(error) = run().await else {
        tracing::info!(target: TRACING_TARGET_SERVER_SHUTDOWN, "application terminated successfully");
        process::exit(0);
    };

    if tracing::enabled!(tracing::Level::ERROR) {
        tracing::error!(target: TRACING_TARGET_SERVER_SHUTDOWN, error = %error, "application terminated with error");
    } else {
        eprintln!("Error: {error:#}");
    }

    process::exit(1);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::init();

    init_tracing();
    log_startup_info();
    cli.validate().context("invalid configuration")?;
    cli.log();

    let state = ServiceState::new(
        cli.reliability.to_registry_config(),
        sheetbuilder_compose::ComposeConfig::default(),
        cli.storage.uploads_dir.clone(),
        cli.storage.max_storage_age(),
    );

    let router = sheetbuilder_server::create_router(state);

    server::serve(router, cli.server).await?;

    Ok(())
}

/// Initializes tracing with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs startup information.
fn log_startup_info() {
    tracing::info!(
        target: TRACING_TARGET_SERVER_STARTUP,
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        arch = std::env::consts::ARCH,
        os = std::env::consts::OS,
        "starting sheetbuilder server"
    );
}
