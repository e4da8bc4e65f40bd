//! Terminal result payload for a completed job.

use serde::{Deserialize, Serialize};

/// The outcome of a completed composition job.
///
/// Returned cached results (from the Reliability Registry's Completed entry)
/// must be defensively cloned before being handed to any caller; `JobResult`
/// is plain-old-data so `Clone` suffices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    pub success: bool,
    pub message: String,
    pub output_file_name: String,
    pub download_path: String,
    pub processing_time_millis: u64,
    pub input_pages: u32,
    pub output_pages: u32,
}
