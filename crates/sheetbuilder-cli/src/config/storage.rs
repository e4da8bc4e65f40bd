//! On-disk storage configuration: where uploads and composed sheets live,
//! and how long they survive before the background janitor sweeps them.

use std::path::PathBuf;

use clap::Args;
use jiff::SignedDuration;

use crate::TRACING_TARGET_CONFIG;

/// File storage configuration.
///
/// # Environment Variables
///
/// - `UPLOADS_DIR` - directory for staged uploads and composed output, relative to the working directory (default: `uploads`)
/// - `MAX_STORAGE_AGE_DAYS` - age, in days, after which a file is swept from the uploads directory (default: 7)
#[derive(Debug, Clone, Args)]
pub struct StorageConfig {
    #[arg(long, env = "UPLOADS_DIR", default_value = "uploads")]
    pub uploads_dir: PathBuf,

    #[arg(long, env = "MAX_STORAGE_AGE_DAYS", default_value_t = 7)]
    pub max_storage_age_days: u64,
}

impl StorageConfig {
    /// Returns the retention window as a `SignedDuration`.
    #[must_use]
    pub fn max_storage_age(&self) -> SignedDuration {
        SignedDuration::from_hours(24 * self.max_storage_age_days as i64)
    }

    /// Logs storage configuration at startup.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            uploads_dir = %self.uploads_dir.display(),
            max_storage_age_days = self.max_storage_age_days,
            "storage configuration"
        );
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: PathBuf::from("uploads"),
            max_storage_age_days: 7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_storage_age_converts_days_to_duration() {
        let config = StorageConfig::default();
        assert_eq!(config.max_storage_age(), SignedDuration::from_hours(24 * 7));
    }
}
