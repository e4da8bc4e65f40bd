//! Process-wide application state, injected into every handler.
//!
//! Grounded on the teacher's `ServiceState`-as-dependency-injection-container
//! pattern: one `Clone`-cheap struct constructed once at startup and threaded
//! through `axum::extract::State`, rather than ambient globals (spec.md §9's
//! "global singletons" redesign note).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jiff::{SignedDuration, Timestamp};
use sheetbuilder_compose::ComposeConfig;
use sheetbuilder_jobs::{Broker, Registry, RegistryConfig};

/// Tracing target for the disk storage janitor.
const STORAGE_TARGET: &str = "sheetbuilder_server::storage";

/// How often the storage sweep scans the uploads directory.
const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(3600);

/// Shared, cheaply-cloneable application state.
#[derive(Clone)]
pub struct ServiceState {
    registry: Registry,
    broker: Broker,
    compose_config: ComposeConfig,
    uploads_dir: Arc<PathBuf>,
}

impl ServiceState {
    /// Constructs state for a fresh process: starts the registry's sweep
    /// task, the broker's reap task, and a disk janitor that deletes files
    /// under `uploads_dir` older than `max_storage_age`.
    pub fn new(
        registry_config: RegistryConfig,
        compose_config: ComposeConfig,
        uploads_dir: PathBuf,
        max_storage_age: SignedDuration,
    ) -> Self {
        let state = Self {
            registry: Registry::new(registry_config),
            broker: Broker::new(),
            compose_config,
            uploads_dir: Arc::new(uploads_dir),
        };

        state.start_storage_sweep(max_storage_age);
        state
    }

    /// Spawns the periodic sweep that removes stale files from the uploads
    /// directory, mirroring the registry's own background-sweep pattern.
    fn start_storage_sweep(&self, max_age: SignedDuration) {
        let uploads_dir = Arc::clone(&self.uploads_dir);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                match sweep_uploads_dir(&uploads_dir, max_age).await {
                    Ok(removed) if removed > 0 => {
                        tracing::debug!(target: STORAGE_TARGET, removed, "swept stale uploaded files");
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(target: STORAGE_TARGET, %error, "storage sweep failed");
                    }
                }
            }
        });
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn broker(&self) -> &Broker {
        &self.broker
    }

    pub fn compose_config(&self) -> ComposeConfig {
        self.compose_config
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }
}

/// Removes regular files under `dir` whose modification time is older than
/// `max_age`. Missing directories are treated as nothing to sweep, since the
/// uploads directory may not exist yet on a fresh checkout.
async fn sweep_uploads_dir(dir: &Path, max_age: SignedDuration) -> std::io::Result<usize> {
    let mut read_dir = match tokio::fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(error) => return Err(error),
    };

    let now = Timestamp::now();
    let mut removed = 0usize;

    while let Some(entry) = read_dir.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified: Timestamp = metadata.modified()?.into();
        if modified + max_age < now {
            tokio::fs::remove_file(entry.path()).await?;
            removed += 1;
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_state_exposes_configured_uploads_dir() {
        let state = ServiceState::new(
            RegistryConfig::default(),
            ComposeConfig::default(),
            PathBuf::from("/tmp/sheetbuilder-uploads"),
            SignedDuration::from_hours(24 * 30),
        );
        assert_eq!(state.uploads_dir(), Path::new("/tmp/sheetbuilder-uploads"));
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.pdf");
        let stale = dir.path().join("stale.pdf");
        std::fs::write(&fresh, b"x").unwrap();
        std::fs::write(&stale, b"x").unwrap();

        let long_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(3600);
        let stale_file = std::fs::File::open(&stale).unwrap();
        stale_file.set_modified(long_ago).unwrap();

        let removed = sweep_uploads_dir(dir.path(), SignedDuration::from_mins(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(fresh.exists());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn sweep_of_missing_directory_is_a_noop() {
        let removed = sweep_uploads_dir(Path::new("/nonexistent/sheetbuilder-path"), SignedDuration::from_mins(30))
            .await
            .unwrap();
        assert_eq!(removed, 0);
    }
}
