//! The Progress Broker: sole owner of job records, fan-out of progress events
//! to subscribers via an edge-triggered, at-most-one-in-flight delivery
//! model.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jiff::{SignedDuration, Timestamp};
use sheetbuilder_core::{JobId, JobRecord, JobResult, ProgressEvent, Stage};
use tokio::sync::{RwLock, oneshot};
use tokio_util::sync::CancellationToken;

/// Logging target for broker operations.
const BROKER_TARGET: &str = "sheetbuilder_jobs::broker";

/// How often the reaping sweep scans for stale job records.
const REAP_INTERVAL: StdDuration = StdDuration::from_secs(300);

/// How long a completed/failed record survives before reaping.
const TERMINAL_TTL: SignedDuration = SignedDuration::from_hours(2);

/// How long a non-terminal record survives before it is presumed stuck and
/// reaped anyway.
const STUCK_TTL: SignedDuration = SignedDuration::from_mins(30);

/// How long a single subscriber wait may block before the sequence ends,
/// forcing the caller to re-subscribe rather than hold an indefinite
/// connection open.
const SUBSCRIBER_TIMEOUT: StdDuration = StdDuration::from_secs(30);

type WaiterList = Vec<oneshot::Sender<ProgressEvent>>;

/// Owns every [`JobRecord`] and multiplexes progress events to subscribers.
#[derive(Clone)]
pub struct Broker {
    jobs: Arc<RwLock<HashMap<JobId, JobRecord>>>,
    subscribers: Arc<RwLock<HashMap<JobId, WaiterList>>>,
}

impl Broker {
    /// Creates a new broker and starts its background reaping sweep.
    pub fn new() -> Self {
        let broker = Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        };
        broker.start_reap_task();
        broker
    }

    /// Creates a fresh job in the `Initializing` stage and returns its id.
    pub async fn create_job(&self) -> JobId {
        let job_id = JobId::generate();
        self.create_job_with_id(job_id.clone()).await;
        job_id
    }

    /// Creates a fresh job record under a caller-supplied id.
    ///
    /// Used by the submission handler when the registry has already decided
    /// `job_id` via `register_or_resolve`, so the broker's record and the
    /// registry's `ActiveJobEntry` share the same id.
    pub async fn create_job_with_id(&self, job_id: JobId) {
        let record = JobRecord::new(job_id.clone());
        self.jobs.write().await.insert(job_id.clone(), record);
        tracing::debug!(target: BROKER_TARGET, job_id = %job_id, "job created");
    }

    /// Stamps `job_id` on `evt`, overwrites the record's `last_progress`, and
    /// wakes current subscribers. Silently ignored if `job_id` is unknown or
    /// already terminal (terminal records are write-once, I3).
    pub async fn update_progress(&self, job_id: &JobId, mut evt: ProgressEvent) {
        evt.job_id = job_id.clone();

        let delivered = {
            let mut jobs = self.jobs.write().await;
            let Some(record) = jobs.get_mut(job_id) else {
                tracing::warn!(target: BROKER_TARGET, job_id = %job_id, "update_progress for unknown job");
                return;
            };
            if record.stage.is_terminal() {
                return;
            }
            record.last_progress = Some(evt.clone());
            true
        };

        if delivered {
            self.wake_subscribers(job_id, evt).await;
        }
    }

    /// Transitions `job_id` to `stage` and emits a synthesized event carrying
    /// the new stage and `operation`. Invalid transitions are silently
    /// ignored.
    pub async fn update_stage(&self, job_id: &JobId, stage: Stage, operation: impl Into<String>) {
        let transitioned = {
            let mut jobs = self.jobs.write().await;
            match jobs.get_mut(job_id) {
                Some(record) if record.stage.can_transition_to(stage) => {
                    record.stage = stage;
                    true
                }
                _ => false,
            }
        };

        if transitioned {
            let evt = ProgressEvent::for_stage_transition(job_id.clone(), stage, operation);
            self.update_progress(job_id, evt).await;
        }
    }

    /// Sets `stage=Completed`, `ended_at=now`, and `result`; emits a terminal
    /// event. Idempotent: a second call on an already-terminal record is a
    /// no-op (first write wins).
    pub async fn complete_job(&self, job_id: &JobId, result: JobResult) {
        let evt = {
            let mut jobs = self.jobs.write().await;
            let Some(record) = jobs.get_mut(job_id) else {
                return;
            };
            if record.stage.is_terminal() {
                return;
            }
            record.stage = Stage::Completed;
            record.ended_at = Some(Timestamp::now());
            record.result = Some(result);
            ProgressEvent::for_stage_transition(job_id.clone(), Stage::Completed, "completed")
        };
        if let Some(record) = self.jobs.read().await.get(job_id) {
            if let Some(timing) = record.timing() {
                tracing::info!(
                    target: BROKER_TARGET,
                    job_id = %job_id,
                    duration_ms = timing.duration().as_millis(),
                    "job completed"
                );
            }
        }
        self.wake_subscribers(job_id, evt).await;
    }

    /// Sets `stage=Failed` with `error_message`; emits a terminal event.
    /// Idempotent, like [`Self::complete_job`].
    pub async fn fail_job(&self, job_id: &JobId, error_message: impl Into<String>) {
        let evt = {
            let mut jobs = self.jobs.write().await;
            let Some(record) = jobs.get_mut(job_id) else {
                return;
            };
            if record.stage.is_terminal() {
                return;
            }
            record.stage = Stage::Failed;
            record.ended_at = Some(Timestamp::now());
            record.error_message = Some(error_message.into());
            ProgressEvent::for_stage_transition(job_id.clone(), Stage::Failed, "failed")
        };
        if let Some(record) = self.jobs.read().await.get(job_id) {
            if let Some(timing) = record.timing() {
                tracing::warn!(
                    target: BROKER_TARGET,
                    job_id = %job_id,
                    duration_ms = timing.duration().as_millis(),
                    "job failed"
                );
            }
        }
        self.wake_subscribers(job_id, evt).await;
    }

    /// Returns a snapshot of the job record, or `None` if unknown (or
    /// already reaped).
    pub async fn get_status(&self, job_id: &JobId) -> Option<JobRecord> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Subscribes to progress for `job_id`. The returned stream yields the
    /// next event after each registration; it terminates when the job
    /// reaches a terminal stage (the terminal event is yielded first), when
    /// `cancel` fires, or after [`SUBSCRIBER_TIMEOUT`] with no event.
    ///
    /// This is an edge-triggered, at-most-one-in-flight model: each waiter is
    /// a one-shot handle that is consumed and re-registered on every
    /// iteration, so no per-subscriber buffering is required. Events between
    /// registrations are lost by design; every event carries full state so
    /// nothing is unrecoverable.
    pub fn subscribe(
        &self,
        job_id: JobId,
        cancel: CancellationToken,
    ) -> impl futures_util::Stream<Item = ProgressEvent> + Send + 'static {
        let broker = self.clone();
        async_stream::stream! {
            loop {
                if let Some(record) = broker.get_status(&job_id).await {
                    if record.stage.is_terminal() {
                        if let Some(evt) = record.last_progress {
                            yield evt;
                        }
                        break;
                    }
                } else {
                    break;
                }

                let (tx, rx) = oneshot::channel();
                broker.register_waiter(&job_id, tx).await;

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    result = rx => {
                        match result {
                            Ok(evt) => {
                                let terminal = evt.stage.is_terminal();
                                yield evt;
                                if terminal {
                                    break;
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    _ = tokio::time::sleep(SUBSCRIBER_TIMEOUT) => break,
                }
            }
        }
    }

    async fn register_waiter(&self, job_id: &JobId, tx: oneshot::Sender<ProgressEvent>) {
        self.subscribers
            .write()
            .await
            .entry(job_id.clone())
            .or_default()
            .push(tx);
    }

    async fn wake_subscribers(&self, job_id: &JobId, evt: ProgressEvent) {
        let waiters = self.subscribers.write().await.remove(job_id).unwrap_or_default();
        for tx in waiters {
            // A wake that fails (the subscriber's receiver was dropped, e.g.
            // the HTTP connection closed) is logged and skipped; it must not
            // destabilize a running job.
            if tx.send(evt.clone()).is_err() {
                tracing::debug!(target: BROKER_TARGET, job_id = %job_id, "subscriber wake failed, receiver dropped");
            }
        }
    }

    fn start_reap_task(&self) {
        let jobs = Arc::clone(&self.jobs);
        let subscribers = Arc::clone(&self.subscribers);

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(REAP_INTERVAL);
            loop {
                tick.tick().await;
                let now = Timestamp::now();
                let mut jobs = jobs.write().await;
                let before = jobs.len();
                jobs.retain(|_, record| !Self::is_reapable(record, now));
                let removed = before - jobs.len();
                if removed > 0 {
                    let mut subs = subscribers.write().await;
                    subs.retain(|job_id, _| jobs.contains_key(job_id));
                    tracing::debug!(target: BROKER_TARGET, removed, remaining = jobs.len(), "reaped stale job records");
                }
            }
        });
    }

    fn is_reapable(record: &JobRecord, now: Timestamp) -> bool {
        match record.ended_at {
            Some(ended_at) => ended_at + TERMINAL_TTL < now,
            None => record.started_at + STUCK_TTL < now,
        }
    }
}

impl Default for Broker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn sample_result() -> JobResult {
        JobResult {
            success: true,
            message: "ok".into(),
            output_file_name: "out.pdf".into(),
            download_path: "/api/pdf/download/out.pdf".into(),
            processing_time_millis: 5,
            input_pages: 1,
            output_pages: 1,
        }
    }

    #[tokio::test]
    async fn create_job_starts_initializing() {
        let broker = Broker::new();
        let job_id = broker.create_job().await;
        let record = broker.get_status(&job_id).await.expect("record exists");
        assert_eq!(record.stage, Stage::Initializing);
    }

    #[tokio::test]
    async fn complete_job_is_idempotent() {
        let broker = Broker::new();
        let job_id = broker.create_job().await;

        broker.complete_job(&job_id, sample_result()).await;
        let first = broker.get_status(&job_id).await.unwrap();

        let mut other = sample_result();
        other.message = "different".into();
        broker.complete_job(&job_id, other).await;
        let second = broker.get_status(&job_id).await.unwrap();

        assert_eq!(first.result, second.result);
        assert_eq!(second.result.unwrap().message, "ok");
    }

    #[tokio::test]
    async fn subscriber_receives_terminal_event_then_closes() {
        let broker = Broker::new();
        let job_id = broker.create_job().await;

        let broker_clone = broker.clone();
        let job_clone = job_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(StdDuration::from_millis(10)).await;
            broker_clone.complete_job(&job_clone, sample_result()).await;
        });

        let mut stream = Box::pin(broker.subscribe(job_id, CancellationToken::new()));
        let evt = stream.next().await.expect("terminal event");
        assert_eq!(evt.stage, Stage::Completed);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelling_subscriber_ends_stream_without_affecting_job() {
        let broker = Broker::new();
        let job_id = broker.create_job().await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let mut stream = Box::pin(broker.subscribe(job_id.clone(), cancel));
        assert!(stream.next().await.is_none());

        let record = broker.get_status(&job_id).await.unwrap();
        assert_eq!(record.stage, Stage::Initializing);
    }

    #[tokio::test]
    async fn invalid_transition_is_ignored() {
        let broker = Broker::new();
        let job_id = broker.create_job().await;
        broker.complete_job(&job_id, sample_result()).await;

        broker.update_stage(&job_id, Stage::ProcessingPages, "should be ignored").await;
        let record = broker.get_status(&job_id).await.unwrap();
        assert_eq!(record.stage, Stage::Completed);
    }
}
