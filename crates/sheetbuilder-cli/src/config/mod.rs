//! CLI configuration management.
//!
//! ```text
//! Cli
//! ├── server: ServerConfig             # host, port, timeouts
//! ├── reliability: ReliabilityConfig   # idempotency and legacy-endpoint gate
//! └── storage: StorageConfig           # uploads directory and retention
//! ```
//!
//! All fields can be set via CLI arguments or environment variables; run with
//! `--help` to see the full list.

mod reliability;
mod server;
mod storage;

use anyhow::Context;
use clap::Parser;
pub use reliability::ReliabilityConfig;
pub use server::ServerConfig;
pub use storage::StorageConfig;

use crate::TRACING_TARGET_CONFIG;

/// Complete CLI configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "sheetbuilder")]
#[command(about = "PDF sheet composition server")]
#[command(version)]
pub struct Cli {
    /// Server network and lifecycle configuration.
    #[clap(flatten)]
    pub server: ServerConfig,

    /// Upload reliability configuration (idempotency, legacy gate).
    #[clap(flatten)]
    pub reliability: ReliabilityConfig,

    /// File storage configuration (uploads directory, retention).
    #[clap(flatten)]
    pub storage: StorageConfig,
}

impl Cli {
    /// Loads `.env` (if present) and parses CLI arguments. Preferred over
    /// `parse()` directly so clap's `env` attributes can see `.env` values.
    pub fn init() -> Self {
        if let Err(err) = dotenvy::dotenv()
            && !err.not_found()
        {
            eprintln!("Warning: failed to load .env file: {err}");
        }
        Self::parse()
    }

    /// Validates all configuration values.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.server.validate().context("invalid server configuration")?;
        self.reliability.validate().context("invalid reliability configuration")?;
        Ok(())
    }

    /// Logs configuration at info/debug level (no sensitive information).
    pub fn log(&self) {
        self.server.log();
        self.reliability.log();
        self.storage.log();

        tracing::debug!(target: TRACING_TARGET_CONFIG, "configuration loaded");
    }
}
