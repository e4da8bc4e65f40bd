//! Upload reliability configuration: idempotent deduplication and the
//! legacy endpoint's size gate.

use anyhow::{anyhow, Result as AnyhowResult};
use clap::Args;
use jiff::SignedDuration;
use sheetbuilder_jobs::RegistryConfig;

use crate::TRACING_TARGET_CONFIG;

/// Configuration for the Reliability Registry.
///
/// # Environment Variables
///
/// - `IDEMPOTENCY_ACTIVE` - enable fingerprint-based deduplication (default: true)
/// - `RECENT_RESULT_TTL_MINUTES` - how long a completed result is reused (1-1440, default: 30)
/// - `ENFORCE_PROGRESS_FOR_LARGE` - block the legacy endpoint above the size threshold (default: true)
/// - `LARGE_FILE_THRESHOLD_MB` - size threshold in MiB (1-2048, default: 200)
#[derive(Debug, Clone, Args)]
pub struct ReliabilityConfig {
    #[arg(long, env = "IDEMPOTENCY_ACTIVE", default_value_t = true)]
    pub idempotency_active: bool,

    #[arg(long, env = "RECENT_RESULT_TTL_MINUTES", default_value_t = 30)]
    pub recent_result_ttl_minutes: u64,

    #[arg(long, env = "ENFORCE_PROGRESS_FOR_LARGE", default_value_t = true)]
    pub enforce_progress_for_large: bool,

    #[arg(long, env = "LARGE_FILE_THRESHOLD_MB", default_value_t = 200)]
    pub large_file_threshold_mb: u64,
}

impl ReliabilityConfig {
    /// Validates all configuration values.
    pub fn validate(&self) -> AnyhowResult<()> {
        if self.recent_result_ttl_minutes == 0 || self.recent_result_ttl_minutes > 1440 {
            return Err(anyhow!(
                "recent result ttl {} minutes is invalid; must be between 1 and 1440",
                self.recent_result_ttl_minutes
            ));
        }

        if self.large_file_threshold_mb == 0 || self.large_file_threshold_mb > 2048 {
            return Err(anyhow!(
                "large file threshold {} MiB is invalid; must be between 1 and 2048",
                self.large_file_threshold_mb
            ));
        }

        Ok(())
    }

    /// Converts this CLI configuration into the registry's runtime config.
    #[must_use]
    pub fn to_registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            idempotency_active: self.idempotency_active,
            recent_result_ttl: SignedDuration::from_mins(self.recent_result_ttl_minutes as i64),
            enforce_progress_for_large: self.enforce_progress_for_large,
            large_file_threshold_bytes: self.large_file_threshold_mb * 1024 * 1024,
        }
    }

    /// Logs reliability configuration at startup.
    pub fn log(&self) {
        tracing::info!(
            target: TRACING_TARGET_CONFIG,
            idempotency_active = self.idempotency_active,
            recent_result_ttl_minutes = self.recent_result_ttl_minutes,
            enforce_progress_for_large = self.enforce_progress_for_large,
            large_file_threshold_mb = self.large_file_threshold_mb,
            "reliability configuration"
        );
    }
}

impl Default for ReliabilityConfig {
    fn default() -> Self {
        Self {
            idempotency_active: true,
            recent_result_ttl_minutes: 30,
            enforce_progress_for_large: true,
            large_file_threshold_mb: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config() {
        assert!(ReliabilityConfig::default().validate().is_ok());
    }

    #[test]
    fn reject_out_of_range_ttl() {
        let mut config = ReliabilityConfig::default();
        config.recent_result_ttl_minutes = 0;
        assert!(config.validate().is_err());
        config.recent_result_ttl_minutes = 1441;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_out_of_range_threshold() {
        let mut config = ReliabilityConfig::default();
        config.large_file_threshold_mb = 0;
        assert!(config.validate().is_err());
        config.large_file_threshold_mb = 2049;
        assert!(config.validate().is_err());
    }

    #[test]
    fn converts_to_registry_config_in_bytes() {
        let config = ReliabilityConfig::default();
        let registry_config = config.to_registry_config();
        assert_eq!(registry_config.large_file_threshold_bytes, 200 * 1024 * 1024);
        assert_eq!(registry_config.recent_result_ttl, SignedDuration::from_mins(30));
    }
}
