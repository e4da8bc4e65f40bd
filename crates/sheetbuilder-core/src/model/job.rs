//! Job records and progress events owned by the progress broker.

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::common::Timing;
use crate::model::{JobId, JobResult};

/// Lifecycle stage of a job.
///
/// Transitions flow `Initializing → PreparingDimensions → ProcessingPages →
/// OptimizingOutput → Finalizing → Completed`; any non-terminal stage may
/// transition to `Failed`. Invalid transitions (e.g. `Completed →
/// ProcessingPages`) are silently ignored by [`crate::Stage::can_transition_to`]
/// callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    Initializing,
    PreparingDimensions,
    ProcessingPages,
    OptimizingOutput,
    Finalizing,
    Completed,
    Failed,
}

impl Stage {
    /// Whether this stage is terminal (`Completed` or `Failed`).
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether a transition from `self` to `next` is permitted by the state
    /// machine. Any non-terminal stage may transition to `Failed`. Terminal
    /// stages never transition anywhere (write-once).
    pub const fn can_transition_to(self, next: Self) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, Self::Failed) {
            return true;
        }
        matches!(
            (self, next),
            (Self::Initializing, Self::PreparingDimensions)
                | (Self::PreparingDimensions, Self::ProcessingPages)
                | (Self::ProcessingPages, Self::OptimizingOutput)
                | (Self::OptimizingOutput, Self::Finalizing)
                | (Self::Finalizing, Self::Completed)
                // Finalizing is not always emitted before the terminal event.
                | (Self::ProcessingPages, Self::Completed)
                | (Self::OptimizingOutput, Self::Completed)
        )
    }
}

/// Memory and cache counters reported alongside progress, sourced from the
/// composition worker's bounded page-form-object cache.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfCounters {
    #[serde(rename = "memoryMB")]
    pub memory_mb: f64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_hit_ratio: f64,
    pub cached_objects: usize,
    pub sheets_generated: u64,
}

/// A single progress update for a job.
///
/// Emitted monotonically in `(stage, current_page)` but not strictly ordered
/// in wall time across subscribers; every event carries the full current
/// state so a subscriber that misses intermediate events loses no
/// information it cannot recover from the next one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub stage: Stage,
    pub current_page: u32,
    pub total_pages: u32,
    pub percent_complete: f64,
    pub pages_per_second: f64,
    pub eta_seconds: f64,
    pub elapsed_seconds: f64,
    pub operation: String,
    pub perf: PerfCounters,
    pub timestamp: Timestamp,
}

impl ProgressEvent {
    /// Builds an event carrying only a stage transition, with zeroed page
    /// and throughput counters; used by `updateStage`.
    pub fn for_stage_transition(job_id: JobId, stage: Stage, operation: impl Into<String>) -> Self {
        Self {
            job_id,
            stage,
            current_page: 0,
            total_pages: 0,
            percent_complete: Self::stage_floor_percent(stage),
            pages_per_second: 0.0,
            eta_seconds: 0.0,
            elapsed_seconds: 0.0,
            operation: operation.into(),
            perf: PerfCounters::default(),
            timestamp: Timestamp::now(),
        }
    }

    fn stage_floor_percent(stage: Stage) -> f64 {
        match stage {
            Stage::Initializing => 0.0,
            Stage::PreparingDimensions => 5.0,
            Stage::ProcessingPages => 10.0,
            Stage::OptimizingOutput => 95.0,
            Stage::Finalizing => 98.0,
            Stage::Completed | Stage::Failed => 100.0,
        }
    }
}

/// A job's full record as owned by the progress broker.
///
/// Mutated only by the worker that owns it plus the broker's terminal hooks
/// (`completeJob`/`failJob`); terminal states are write-once (I3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    pub stage: Stage,
    pub started_at: Timestamp,
    pub ended_at: Option<Timestamp>,
    pub last_progress: Option<ProgressEvent>,
    pub result: Option<JobResult>,
    pub error_message: Option<String>,
}

impl JobRecord {
    /// Creates a fresh record in the `Initializing` stage.
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            stage: Stage::Initializing,
            started_at: Timestamp::now(),
            ended_at: None,
            last_progress: None,
            result: None,
            error_message: None,
        }
    }

    /// Wall-clock span of the job, once it has reached a terminal stage.
    /// `None` while `ended_at` is still unset.
    pub fn timing(&self) -> Option<Timing> {
        self.ended_at.map(|ended_at| Timing::new(self.started_at, ended_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_stages_never_transition() {
        assert!(!Stage::Completed.can_transition_to(Stage::ProcessingPages));
        assert!(!Stage::Failed.can_transition_to(Stage::Completed));
    }

    #[test]
    fn any_nonterminal_stage_may_fail() {
        assert!(Stage::Initializing.can_transition_to(Stage::Failed));
        assert!(Stage::ProcessingPages.can_transition_to(Stage::Failed));
        assert!(Stage::Finalizing.can_transition_to(Stage::Failed));
    }

    #[test]
    fn finalizing_may_be_skipped_before_completion() {
        assert!(Stage::ProcessingPages.can_transition_to(Stage::Completed));
        assert!(Stage::OptimizingOutput.can_transition_to(Stage::Completed));
    }

    #[test]
    fn new_job_record_starts_initializing() {
        let record = JobRecord::new(JobId::generate());
        assert_eq!(record.stage, Stage::Initializing);
        assert!(record.ended_at.is_none());
        assert!(record.result.is_none());
    }
}
