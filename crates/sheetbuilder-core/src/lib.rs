#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![doc = include_str!("../README.md")]

mod common;
pub mod error;
pub mod model;

#[doc(hidden)]
pub mod prelude;

pub use common::Timing;
pub use error::{BoxedError, Error, ErrorKind, Result};
pub use model::{
    ActiveJobEntry, CompletedJobEntry, Fingerprint, FingerprintDigest, JobId, JobRecord,
    JobResult, Order, PerfCounters, ProgressEvent, Stage,
};
