//! The Reliability Registry: decides the fate of a new submission before any
//! work begins, and caches recently-completed results by fingerprint.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jiff::{SignedDuration, Timestamp};
use sheetbuilder_core::{ActiveJobEntry, CompletedJobEntry, FingerprintDigest, JobId, JobResult};
use tokio::sync::RwLock;

/// Logging target for registry operations.
const REGISTRY_TARGET: &str = "sheetbuilder_jobs::registry";

/// How often the background sweep scans for expired completed entries.
const SWEEP_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// Registry configuration.
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// When `false`, `register_or_resolve` always returns `Registered`,
    /// disabling deduplication entirely.
    pub idempotency_active: bool,
    /// How long a `CompletedJobEntry` is reused before falling through to a
    /// fresh submission.
    pub recent_result_ttl: SignedDuration,
    /// Whether the legacy synchronous endpoint enforces a size gate.
    pub enforce_progress_for_large: bool,
    /// Size threshold (bytes) above which the legacy endpoint is blocked.
    pub large_file_threshold_bytes: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            idempotency_active: true,
            recent_result_ttl: SignedDuration::from_mins(30),
            enforce_progress_for_large: true,
            large_file_threshold_bytes: 200 * 1024 * 1024,
        }
    }
}

/// The result of `register_or_resolve`.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Fresh submission; caller proceeds to start work under `JobId`.
    Registered(JobId),
    /// An equivalent job is already running; caller must not start work.
    DuplicateActive(JobId),
    /// An equivalent job finished within TTL; caller returns this result
    /// without reprocessing. Already a deep copy safe to hand to callers.
    DuplicateCompleted(JobId, JobResult),
}

/// Idempotent job registry and completed-result cache, keyed by upload
/// fingerprint digest.
///
/// Both maps are guarded by a single [`tokio::sync::RwLock`] each; the
/// check-then-insert sequence in `register_or_resolve` is performed while
/// holding the active map's write lock for its whole duration, which
/// serializes concurrent submissions for the same digest without a separate
/// compare-and-swap step (I1).
#[derive(Clone)]
pub struct Registry {
    active: Arc<RwLock<HashMap<FingerprintDigest, ActiveJobEntry>>>,
    completed: Arc<RwLock<HashMap<FingerprintDigest, CompletedJobEntry>>>,
    config: RegistryConfig,
}

impl Registry {
    /// Creates a new registry and starts its background sweep task.
    pub fn new(config: RegistryConfig) -> Self {
        let registry = Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            completed: Arc::new(RwLock::new(HashMap::new())),
            config,
        };

        registry.start_sweep_task();

        tracing::info!(
            target: REGISTRY_TARGET,
            idempotency_active = config.idempotency_active,
            "reliability registry initialized"
        );

        registry
    }

    /// Decides the fate of a new submission for `digest`. `job_id_factory` is
    /// invoked only when a fresh job must be registered, so a panicking
    /// factory leaves registry state unchanged (the active insertion is the
    /// last step).
    pub async fn register_or_resolve<F>(&self, digest: FingerprintDigest, job_id_factory: F) -> Outcome
    where
        F: FnOnce() -> JobId,
    {
        if !self.config.idempotency_active {
            return Outcome::Registered(job_id_factory());
        }

        let mut active = self.active.write().await;

        if let Some(entry) = active.get(&digest) {
            return Outcome::DuplicateActive(entry.job_id.clone());
        }

        let now = Timestamp::now();
        let fresh_completed = {
            let completed = self.completed.read().await;
            completed
                .get(&digest)
                .filter(|entry| entry.is_fresh(now, self.config.recent_result_ttl))
                .cloned()
        };

        if let Some(entry) = fresh_completed {
            return Outcome::DuplicateCompleted(entry.job_id, entry.result);
        }

        // Lazily drop an expired completed entry if one exists.
        self.completed.write().await.remove(&digest);

        let job_id = job_id_factory();
        active.insert(
            digest,
            ActiveJobEntry {
                fingerprint_digest: digest,
                job_id: job_id.clone(),
                started_at: now,
            },
        );

        tracing::debug!(target: REGISTRY_TARGET, job_id = %job_id, fingerprint = %digest, "registered new job");
        Outcome::Registered(job_id)
    }

    /// Marks a job completed: removes the Active entry and inserts a
    /// Completed entry with a defensively cloned result. Verifies `job_id`
    /// matches the Active entry so a stale caller cannot overwrite a newer
    /// job (I2, I3).
    pub async fn mark_completed(&self, digest: FingerprintDigest, job_id: &JobId, result: JobResult) {
        let mut active = self.active.write().await;
        let matches = active.get(&digest).is_some_and(|e| &e.job_id == job_id);
        if !matches {
            tracing::debug!(
                target: REGISTRY_TARGET,
                job_id = %job_id,
                "mark_completed ignored: active entry missing or superseded"
            );
            return;
        }
        active.remove(&digest);
        drop(active);

        self.completed.write().await.insert(
            digest,
            CompletedJobEntry {
                fingerprint_digest: digest,
                job_id: job_id.clone(),
                completed_at: Timestamp::now(),
                result,
            },
        );
    }

    /// Marks a job failed: removes the Active entry without caching a
    /// result, so a retry is allowed immediately.
    pub async fn mark_failed(&self, digest: FingerprintDigest, job_id: &JobId) {
        let mut active = self.active.write().await;
        if active.get(&digest).is_some_and(|e| &e.job_id == job_id) {
            active.remove(&digest);
        }
    }

    /// Whether the legacy synchronous endpoint must reject `size_bytes`.
    pub fn should_block_legacy(&self, size_bytes: u64) -> bool {
        self.config.enforce_progress_for_large && size_bytes >= self.config.large_file_threshold_bytes
    }

    /// Whether `output_file_name` belongs to a still-fresh `CompletedJobEntry`.
    /// A cached entry is reused across every caller whose upload matches the
    /// same fingerprint, so its output file must not be unilaterally deleted
    /// by any one of them.
    pub async fn has_fresh_cached_output(&self, output_file_name: &str) -> bool {
        let now = Timestamp::now();
        self.completed
            .read()
            .await
            .values()
            .any(|entry| entry.is_fresh(now, self.config.recent_result_ttl) && entry.result.output_file_name == output_file_name)
    }

    /// Number of currently-active entries, for tests and diagnostics.
    pub async fn active_len(&self) -> usize {
        self.active.read().await.len()
    }

    fn start_sweep_task(&self) {
        let completed = Arc::clone(&self.completed);
        let ttl = self.config.recent_result_ttl;

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tick.tick().await;
                let now = Timestamp::now();
                let mut completed = completed.write().await;
                let before = completed.len();
                completed.retain(|_, entry| entry.is_fresh(now, ttl));
                let removed = before - completed.len();
                if removed > 0 {
                    tracing::debug!(
                        target: REGISTRY_TARGET,
                        removed,
                        remaining = completed.len(),
                        "swept expired completed entries"
                    );
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sheetbuilder_core::{Fingerprint, Order};

    fn fp() -> Fingerprint {
        Fingerprint::new("report.pdf", 4096, 0, Order::Norm)
    }

    #[tokio::test]
    async fn fresh_submission_registers() {
        let registry = Registry::new(RegistryConfig::default());
        let outcome = registry
            .register_or_resolve(fp().digest(), JobId::generate)
            .await;
        assert!(matches!(outcome, Outcome::Registered(_)));
    }

    #[tokio::test]
    async fn concurrent_submission_is_duplicate_active() {
        let registry = Registry::new(RegistryConfig::default());
        let digest = fp().digest();

        let first = registry.register_or_resolve(digest, JobId::generate).await;
        let job_id = match first {
            Outcome::Registered(id) => id,
            _ => panic!("expected Registered"),
        };

        let second = registry.register_or_resolve(digest, JobId::generate).await;
        match second {
            Outcome::DuplicateActive(id) => assert_eq!(id, job_id),
            other => panic!("expected DuplicateActive, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn completed_result_is_reused_within_ttl() {
        let registry = Registry::new(RegistryConfig::default());
        let digest = fp().digest();

        let job_id = match registry.register_or_resolve(digest, JobId::generate).await {
            Outcome::Registered(id) => id,
            _ => panic!("expected Registered"),
        };

        let result = JobResult {
            success: true,
            message: "ok".into(),
            output_file_name: "out.pdf".into(),
            download_path: "/api/pdf/download/out.pdf".into(),
            processing_time_millis: 10,
            input_pages: 3,
            output_pages: 1,
        };
        registry.mark_completed(digest, &job_id, result.clone()).await;

        match registry.register_or_resolve(digest, JobId::generate).await {
            Outcome::DuplicateCompleted(id, cached) => {
                assert_eq!(id, job_id);
                assert_eq!(cached, result);
            }
            other => panic!("expected DuplicateCompleted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_job_allows_immediate_retry() {
        let registry = Registry::new(RegistryConfig::default());
        let digest = fp().digest();

        let job_id = match registry.register_or_resolve(digest, JobId::generate).await {
            Outcome::Registered(id) => id,
            _ => panic!("expected Registered"),
        };
        registry.mark_failed(digest, &job_id).await;

        let outcome = registry.register_or_resolve(digest, JobId::generate).await;
        match outcome {
            Outcome::Registered(new_id) => assert_ne!(new_id, job_id),
            other => panic!("expected Registered, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn disabled_idempotency_always_registers() {
        let registry = Registry::new(RegistryConfig {
            idempotency_active: false,
            ..RegistryConfig::default()
        });
        let digest = fp().digest();

        assert!(matches!(
            registry.register_or_resolve(digest, JobId::generate).await,
            Outcome::Registered(_)
        ));
        assert!(matches!(
            registry.register_or_resolve(digest, JobId::generate).await,
            Outcome::Registered(_)
        ));
    }

    #[test]
    fn legacy_gate_blocks_above_threshold() {
        let registry = Registry {
            active: Arc::new(RwLock::new(HashMap::new())),
            completed: Arc::new(RwLock::new(HashMap::new())),
            config: RegistryConfig {
                enforce_progress_for_large: true,
                large_file_threshold_bytes: 200 * 1024 * 1024,
                ..RegistryConfig::default()
            },
        };
        assert!(registry.should_block_legacy(300 * 1024 * 1024));
        assert!(!registry.should_block_legacy(100 * 1024 * 1024));
    }
}
