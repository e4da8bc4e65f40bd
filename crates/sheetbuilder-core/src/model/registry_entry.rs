//! Entries owned by the Reliability Registry.

use jiff::Timestamp;

use crate::model::{FingerprintDigest, JobId, JobResult};

/// Registry record for a currently running job.
///
/// Invariant (I1): at most one `ActiveJobEntry` exists per fingerprint digest
/// at any instant.
#[derive(Debug, Clone)]
pub struct ActiveJobEntry {
    pub fingerprint_digest: FingerprintDigest,
    pub job_id: JobId,
    pub started_at: Timestamp,
}

/// Registry record for a finished job within its result-reuse TTL.
///
/// Invariant (I2): a fingerprint never has both an `ActiveJobEntry` and a
/// fresh `CompletedJobEntry` simultaneously.
#[derive(Debug, Clone)]
pub struct CompletedJobEntry {
    pub fingerprint_digest: FingerprintDigest,
    pub job_id: JobId,
    pub completed_at: Timestamp,
    pub result: JobResult,
}

impl CompletedJobEntry {
    /// Whether this entry is still within `ttl` of `now`.
    pub fn is_fresh(&self, now: Timestamp, ttl: jiff::SignedDuration) -> bool {
        self.completed_at + ttl > now
    }
}
