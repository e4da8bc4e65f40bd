//! Commonly used items from sheetbuilder-core.

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::model::{
    ActiveJobEntry, CompletedJobEntry, Fingerprint, FingerprintDigest, JobId, JobRecord,
    JobResult, Order, PerfCounters, ProgressEvent, Stage,
};
