//! HTTP client implementing the browser-side reattachment protocol
//! (spec.md §4.E) against `sheetbuilder-server`'s asynchronous submission
//! surface.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use jiff::Timestamp;
use serde::Deserialize;
use sheetbuilder_core::{Fingerprint, FingerprintDigest, JobResult, Order, ProgressEvent, Stage};
use tokio::sync::Mutex;

use crate::error::ClientError;
use crate::store::{EntryStatus, JobStore, StoredEntry};

/// Polling cadence used once SSE reattachment fails or yields an
/// unparseable event (spec.md §4.E, step 4: "Never re-upload on any error").
const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Entries older than this are treated as stale on access (spec.md §4.E).
const ENTRY_TTL_MS: i64 = 3600 * 1000;

/// The terminal result of a job this client submitted or reattached to.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub result: JobResult,
}

type PendingFuture = Shared<BoxFuture<'static, Result<JobOutcome, ClientError>>>;

/// Client for the sheet composition server's asynchronous submission and
/// reattachment surface. Cheap to clone: every field is an `Arc` or owned
/// `String`/`reqwest::Client`, itself internally reference-counted.
pub struct Client<S: JobStore> {
    http: reqwest::Client,
    base_url: String,
    store: Arc<S>,
    in_flight: Arc<Mutex<HashMap<FingerprintDigest, PendingFuture>>>,
}

impl<S: JobStore> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            http: self.http.clone(),
            base_url: self.base_url.clone(),
            store: Arc::clone(&self.store),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<S: JobStore + 'static> Client<S> {
    /// Creates a client against `base_url` (e.g. `http://localhost:3000`),
    /// persisting reattachment entries to `store`.
    pub fn new(base_url: impl Into<String>, store: S) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            store: Arc::new(store),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Submits `bytes` for composition, reusing a cached or already-running
    /// result for an equivalent `(file_name, rotation, order)` submission.
    ///
    /// Two concurrent calls with the same fingerprint resolve against the
    /// same pending operation (in-flight coalescing): only the first caller
    /// performs the upload, the rest await its result.
    pub async fn submit(&self, file_name: impl Into<String>, rotation_degrees: u16, order: Order, bytes: Bytes) -> Result<JobOutcome, ClientError> {
        let file_name = file_name.into();
        let fingerprint = Fingerprint::new(file_name.clone(), bytes.len() as i64, rotation_degrees, order);
        let digest = fingerprint.digest();

        let mut in_flight = self.in_flight.lock().await;
        if let Some(pending) = in_flight.get(&digest) {
            let pending = pending.clone();
            drop(in_flight);
            return pending.await;
        }

        let this = self.clone();
        let future: BoxFuture<'static, Result<JobOutcome, ClientError>> =
            Box::pin(async move { this.run_submission(digest, file_name, rotation_degrees, order, bytes).await });
        let shared = future.shared();
        in_flight.insert(digest, shared.clone());
        drop(in_flight);

        let result = shared.await;
        self.in_flight.lock().await.remove(&digest);
        result
    }

    async fn run_submission(
        &self,
        digest: FingerprintDigest,
        file_name: String,
        rotation_degrees: u16,
        order: Order,
        bytes: Bytes,
    ) -> Result<JobOutcome, ClientError> {
        if let Some(entry) = self.fresh_stored_entry(digest).await? {
            match entry.status {
                EntryStatus::Completed => {
                    match self.status(&entry.job_id).await {
                        Ok(status) if status.stage == Stage::Completed => {
                            if let Some(result) = status.result {
                                return Ok(JobOutcome { job_id: entry.job_id, result });
                            }
                        }
                        _ => {}
                    }
                    // Cached as completed but the server disagrees (expired,
                    // swept, or never actually finished): purge and re-upload.
                    self.store.remove(digest).await?;
                }
                EntryStatus::Failed => {
                    self.store.remove(digest).await?;
                }
                EntryStatus::Processing => match self.status(&entry.job_id).await {
                    Ok(status) if status.stage.is_terminal() => {
                        return self.resolve_terminal_status(digest, entry.job_id, status).await;
                    }
                    Ok(_) => return self.reattach(digest, entry.job_id).await,
                    Err(ClientError::NotFound(_)) => {
                        self.store.remove(digest).await?;
                    }
                    Err(other) => return Err(other),
                },
            }
        }

        match self.upload(&file_name, rotation_degrees, order, bytes).await? {
            Submitted::Done(outcome) => {
                self.store
                    .put(
                        digest,
                        StoredEntry {
                            job_id: outcome.job_id.clone(),
                            status: EntryStatus::Completed,
                            updated_at_epoch_ms: now_epoch_ms(),
                        },
                    )
                    .await?;
                Ok(outcome)
            }
            Submitted::Pending(job_id) => {
                self.store
                    .put(
                        digest,
                        StoredEntry {
                            job_id: job_id.clone(),
                            status: EntryStatus::Processing,
                            updated_at_epoch_ms: now_epoch_ms(),
                        },
                    )
                    .await?;
                self.reattach(digest, job_id).await
            }
        }
    }

    async fn fresh_stored_entry(&self, digest: FingerprintDigest) -> Result<Option<StoredEntry>, ClientError> {
        let Some(entry) = self.store.get(digest).await? else {
            return Ok(None);
        };
        if now_epoch_ms().saturating_sub(entry.updated_at_epoch_ms) > ENTRY_TTL_MS {
            self.store.remove(digest).await?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Waits for the job to reach a terminal stage (SSE first, falling back
    /// to polling on any failure to open or parse the stream), then fetches
    /// the final status to recover the result or error message.
    async fn reattach(&self, digest: FingerprintDigest, job_id: String) -> Result<JobOutcome, ClientError> {
        if self.stream_until_terminal(&job_id).await.is_err() {
            tracing::debug!(job_id = %job_id, "SSE reattachment unavailable, falling back to polling");
            self.poll_until_terminal(&job_id).await?;
        }

        let status = self.status(&job_id).await?;
        self.resolve_terminal_status(digest, job_id, status).await
    }

    async fn resolve_terminal_status(&self, digest: FingerprintDigest, job_id: String, status: StatusResponse) -> Result<JobOutcome, ClientError> {
        match status.stage {
            Stage::Completed => {
                let result = status
                    .result
                    .ok_or_else(|| ClientError::Protocol("completed status missing result".into()))?;
                self.store
                    .put(
                        digest,
                        StoredEntry {
                            job_id: job_id.clone(),
                            status: EntryStatus::Completed,
                            updated_at_epoch_ms: now_epoch_ms(),
                        },
                    )
                    .await?;
                Ok(JobOutcome { job_id, result })
            }
            Stage::Failed => {
                self.store
                    .put(
                        digest,
                        StoredEntry {
                            job_id: job_id.clone(),
                            status: EntryStatus::Failed,
                            updated_at_epoch_ms: now_epoch_ms(),
                        },
                    )
                    .await?;
                Err(ClientError::JobFailed(status.error.unwrap_or_else(|| "job failed".to_string())))
            }
            _ => Err(ClientError::Protocol(format!("expected a terminal stage, got {:?}", status.stage))),
        }
    }

    async fn upload(&self, file_name: &str, rotation_degrees: u16, order: Order, bytes: Bytes) -> Result<Submitted, ClientError> {
        let part = reqwest::multipart::Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str("application/pdf")?;
        let form = reqwest::multipart::Form::new()
            .part("pdfFile", part)
            .text("rotationAngle", rotation_degrees.to_string())
            .text("order", order.as_str());

        let response = self
            .http
            .post(self.url("/api/pdf/process-with-progress"))
            .multipart(form)
            .send()
            .await?;

        let body: SubmitResponse = self.parse_response(response).await?;

        if let (Some(true), Some(result)) = (body.duplicate_of, body.result) {
            return Ok(Submitted::Done(JobOutcome { job_id: body.job_id, result }));
        }

        Ok(Submitted::Pending(body.job_id))
    }

    async fn status(&self, job_id: &str) -> Result<StatusResponse, ClientError> {
        let response = self.http.get(self.url(&format!("/api/pdf/status/{job_id}"))).send().await?;
        self.parse_response(response).await
    }

    /// Opens the SSE stream and blocks until an event reports a terminal
    /// stage. Returns `Err` on any connection or parse failure so the
    /// caller falls back to polling rather than re-uploading.
    async fn stream_until_terminal(&self, job_id: &str) -> Result<(), ClientError> {
        use futures::TryStreamExt;

        let response = self.http.get(self.url(&format!("/api/pdf/progress/{job_id}"))).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Http {
                status: response.status().as_u16(),
                message: "progress stream rejected".to_string(),
            });
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.try_next().await? {
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buffer.find("\n\n") {
                let event = buffer[..pos].to_string();
                buffer.drain(..pos + 2);

                for line in event.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        let progress: ProgressEvent = serde_json::from_str(data)?;
                        if progress.stage.is_terminal() {
                            return Ok(());
                        }
                    }
                }
            }
        }

        Err(ClientError::Protocol("progress stream closed before a terminal event".to_string()))
    }

    async fn poll_until_terminal(&self, job_id: &str) -> Result<(), ClientError> {
        loop {
            let status = self.status(job_id).await?;
            if status.stage.is_terminal() {
                return Ok(());
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(&self, response: reqwest::Response) -> Result<T, ClientError> {
        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(status.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Http { status: status.as_u16(), message });
        }
        Ok(response.json().await?)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

enum Submitted {
    Done(JobOutcome),
    Pending(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    #[allow(dead_code)]
    success: bool,
    job_id: String,
    duplicate_of: Option<bool>,
    result: Option<JobResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[allow(dead_code)]
    success: bool,
    #[allow(dead_code)]
    job_id: String,
    stage: Stage,
    #[allow(dead_code)]
    start_time: Timestamp,
    #[allow(dead_code)]
    end_time: Option<Timestamp>,
    #[allow(dead_code)]
    progress: Option<ProgressEvent>,
    result: Option<JobResult>,
    error: Option<String>,
}

fn now_epoch_ms() -> i64 {
    Timestamp::now().as_millisecond()
}

#[cfg(test)]
mod tests {
    use crate::store::MemoryStore;
    use crate::Client;

    #[test]
    fn client_is_cheaply_cloneable() {
        let client = Client::new("http://localhost:3000", MemoryStore::new());
        let cloned = client.clone();
        drop(cloned);
    }

    #[test]
    fn url_strips_a_trailing_slash_from_the_base() {
        let client = Client::new("http://localhost:3000/", MemoryStore::new());
        assert_eq!(client.url("/api/pdf/health"), "http://localhost:3000/api/pdf/health");
    }

    #[tokio::test]
    async fn fresh_stored_entry_discards_entries_past_the_ttl() {
        use sheetbuilder_core::{Fingerprint, Order};

        use crate::store::{EntryStatus, JobStore, StoredEntry};

        let client = Client::new("http://localhost:3000", MemoryStore::new());
        let digest = Fingerprint::new("report.pdf", 4096, 0, Order::Norm).digest();
        client
            .store
            .put(
                digest,
                StoredEntry {
                    job_id: "abc123".into(),
                    status: EntryStatus::Processing,
                    updated_at_epoch_ms: 0,
                },
            )
            .await
            .unwrap();

        let entry = client.fresh_stored_entry(digest).await.unwrap();
        assert!(entry.is_none());
        assert!(client.store.get(digest).await.unwrap().is_none());
    }
}
