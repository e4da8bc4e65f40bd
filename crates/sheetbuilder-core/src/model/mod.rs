//! Shared data model for the job-processing subsystem (spec.md §3).

mod fingerprint;
mod job;
mod job_id;
mod job_result;
mod registry_entry;

pub use fingerprint::{Fingerprint, FingerprintDigest, Order};
pub use job::{JobRecord, PerfCounters, ProgressEvent, Stage};
pub use job_id::JobId;
pub use job_result::JobResult;
pub use registry_entry::{ActiveJobEntry, CompletedJobEntry};
