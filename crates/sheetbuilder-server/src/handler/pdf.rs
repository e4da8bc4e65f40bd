//! The six HTTP endpoints of spec.md §6: async submission, the legacy
//! synchronous gate, SSE progress, status polling, range-aware download, and
//! a health probe.

use std::path::{Path as StdPath, PathBuf};
use std::time::SystemTime;

use axum::extract::{Multipart, Path as AxumPath, Query, Request, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use sheetbuilder_compose::ComposeRequest;
use sheetbuilder_core::{Fingerprint, FingerprintDigest, JobId, JobResult, Order, ProgressEvent, Stage};
use sheetbuilder_jobs::Outcome;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tower_http::services::ServeFile;

use crate::error::{Error, ErrorKind, Result};
use crate::service::ServiceState;

/// Logging target for HTTP-layer submission/resolution events.
const HANDLER_TARGET: &str = "sheetbuilder_server::handler::pdf";

/// The path a large upload must be retried against when the legacy endpoint
/// rejects it (spec.md §6).
const PROGRESS_ENDPOINT: &str = "/api/pdf/process-with-progress";

pub fn routes() -> Router<ServiceState> {
    Router::new()
        .route(PROGRESS_ENDPOINT, post(process_with_progress))
        .route("/api/pdf/process", post(process))
        .route("/api/pdf/progress/{job_id}", get(progress))
        .route("/api/pdf/status/{job_id}", get(status))
        .route("/api/pdf/download/{filename}", get(download_file))
        .route("/api/pdf/health", get(health))
}

/// A validated multipart submission, prior to fingerprinting.
struct Submission {
    bytes: Bytes,
    original_file_name: String,
    rotation_degrees: u16,
    order: Order,
}

async fn parse_submission(multipart: &mut Multipart) -> Result<Submission> {
    let mut file_bytes: Option<Bytes> = None;
    let mut file_name: Option<String> = None;
    let mut rotation: Option<u16> = None;
    let mut order: Option<Order> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| Error::new(ErrorKind::BadRequest).with_message(format!("malformed multipart body: {err}")))?
    {
        match field.name() {
            Some("pdfFile") => {
                file_name = field.file_name().map(str::to_string);
                file_bytes = Some(field.bytes().await.map_err(|err| {
                    Error::new(ErrorKind::BadRequest).with_message(format!("failed to read pdfFile: {err}"))
                })?);
            }
            Some("rotationAngle") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| Error::new(ErrorKind::BadRequest).with_message(format!("invalid rotationAngle: {err}")))?;
                rotation = Some(
                    text.trim()
                        .parse::<u16>()
                        .map_err(|_| Error::new(ErrorKind::BadRequest).with_message("rotationAngle must be an integer in 0..=360"))?,
                );
            }
            Some("order") => {
                let text = field
                    .text()
                    .await
                    .map_err(|err| Error::new(ErrorKind::BadRequest).with_message(format!("invalid order: {err}")))?;
                order = Some(
                    Order::parse(&text).ok_or_else(|| Error::new(ErrorKind::BadRequest).with_message("order must be Norm or Rev"))?,
                );
            }
            _ => {}
        }
    }

    let bytes = file_bytes.ok_or_else(|| Error::new(ErrorKind::BadRequest).with_message("missing pdfFile field"))?;
    let original_file_name =
        file_name.ok_or_else(|| Error::new(ErrorKind::BadRequest).with_message("pdfFile is missing a filename"))?;
    let rotation_degrees =
        rotation.ok_or_else(|| Error::new(ErrorKind::BadRequest).with_message("missing rotationAngle field"))?;
    if rotation_degrees > 360 {
        return Err(Error::new(ErrorKind::BadRequest).with_message("rotationAngle must be between 0 and 360"));
    }
    let order = order.ok_or_else(|| Error::new(ErrorKind::BadRequest).with_message("missing order field"))?;

    Ok(Submission {
        bytes,
        original_file_name,
        rotation_degrees,
        order,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    success: bool,
    job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate_of: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JobResult>,
}

/// Stages the upload to disk and spawns the composition worker. On failure,
/// the registry's Active entry for `digest` is rolled back via `mark_failed`
/// so the fingerprint is immediately retryable rather than permanently
/// jammed (the registry has no independent TTL for Active entries).
async fn stage_and_spawn(state: &ServiceState, job_id: &JobId, digest: FingerprintDigest, submission: Submission) -> Result<()> {
    let upload_path = state.uploads_dir().join(format!("{job_id}_{}", submission.original_file_name));

    if let Err(err) = tokio::fs::write(&upload_path, &submission.bytes).await {
        state.registry().mark_failed(digest, job_id).await;
        return Err(Error::new(ErrorKind::InternalServerError).with_message(format!("failed to stage upload: {err}")));
    }

    state.broker().create_job_with_id(job_id.clone()).await;

    let request = ComposeRequest {
        job_id: job_id.clone(),
        fingerprint_digest: digest,
        upload_path,
        original_file_name: submission.original_file_name,
        rotation_degrees: submission.rotation_degrees,
        order: submission.order,
        uploads_dir: state.uploads_dir().to_path_buf(),
    };

    tokio::spawn(sheetbuilder_compose::run(
        request,
        state.broker().clone(),
        state.registry().clone(),
        state.compose_config(),
    ));

    Ok(())
}

async fn submit(state: &ServiceState, submission: Submission) -> Result<SubmitResponse> {
    let fingerprint = Fingerprint::new(
        submission.original_file_name.clone(),
        submission.bytes.len() as i64,
        submission.rotation_degrees,
        submission.order,
    );
    let digest = fingerprint.digest();

    match state.registry().register_or_resolve(digest, JobId::generate).await {
        Outcome::Registered(job_id) => {
            stage_and_spawn(state, &job_id, digest, submission).await?;
            tracing::info!(target: HANDLER_TARGET, job_id = %job_id, "submission registered");
            Ok(SubmitResponse {
                success: true,
                job_id: job_id.to_string(),
                duplicate_of: None,
                result: None,
            })
        }
        Outcome::DuplicateActive(job_id) => Ok(SubmitResponse {
            success: true,
            job_id: job_id.to_string(),
            duplicate_of: Some(true),
            result: None,
        }),
        Outcome::DuplicateCompleted(job_id, result) => Ok(SubmitResponse {
            success: true,
            job_id: job_id.to_string(),
            duplicate_of: Some(true),
            result: Some(result),
        }),
    }
}

#[tracing::instrument(skip_all, target = HANDLER_TARGET, name = "process_with_progress")]
async fn process_with_progress(State(state): State<ServiceState>, mut multipart: Multipart) -> Result<Json<SubmitResponse>> {
    let submission = parse_submission(&mut multipart).await?;
    Ok(Json(submit(&state, submission).await?))
}

/// The legacy synchronous endpoint. Its only documented difference from
/// `/process-with-progress` is the size gate (spec.md §6); beyond the gate
/// it registers and spawns composition identically.
#[tracing::instrument(skip_all, target = HANDLER_TARGET, name = "process")]
async fn process(State(state): State<ServiceState>, mut multipart: Multipart) -> Result<Json<SubmitResponse>> {
    let submission = parse_submission(&mut multipart).await?;
    if state.registry().should_block_legacy(submission.bytes.len() as u64) {
        return Err(Error::new(ErrorKind::Conflict)
            .with_message("file too large for the synchronous endpoint")
            .with_required_endpoint(PROGRESS_ENDPOINT));
    }
    Ok(Json(submit(&state, submission).await?))
}

#[tracing::instrument(skip_all, target = HANDLER_TARGET, name = "progress", fields(job_id = %job_id_raw))]
async fn progress(
    State(state): State<ServiceState>,
    AxumPath(job_id_raw): AxumPath<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, std::convert::Infallible>>>> {
    let job_id = JobId::from_raw(job_id_raw);
    if state.broker().get_status(&job_id).await.is_none() {
        return Err(Error::new(ErrorKind::NotFound).with_message(format!("no job {job_id}")));
    }

    let cancel = CancellationToken::new();
    let stream = state.broker().subscribe(job_id, cancel).map(|evt: ProgressEvent| {
        let data = serde_json::to_string(&evt).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    job_id: String,
    stage: Stage,
    start_time: Timestamp,
    end_time: Option<Timestamp>,
    progress: Option<ProgressEvent>,
    result: Option<JobResult>,
    error: Option<String>,
}

#[tracing::instrument(skip_all, target = HANDLER_TARGET, name = "status", fields(job_id = %job_id_raw))]
async fn status(State(state): State<ServiceState>, AxumPath(job_id_raw): AxumPath<String>) -> Result<Json<StatusResponse>> {
    let job_id = JobId::from_raw(job_id_raw);
    let record = state
        .broker()
        .get_status(&job_id)
        .await
        .ok_or_else(|| Error::new(ErrorKind::NotFound).with_message(format!("no job {job_id}")))?;

    Ok(Json(StatusResponse {
        success: true,
        job_id: record.job_id.to_string(),
        stage: record.stage,
        start_time: record.started_at,
        end_time: record.ended_at,
        progress: record.last_progress,
        result: record.result,
        error: record.error_message,
    }))
}

#[derive(Deserialize, Default)]
struct DownloadParams {
    #[serde(default, rename = "deleteAfterDownload")]
    delete_after_download: Option<bool>,
}

/// Resolves a bare download filename against the uploads directory: exact
/// match first, then the most recently modified `*_<filename>` match
/// (spec.md §6 — the server names outputs `<jobId>_<original>_A<rot>_<ORD>.pdf`,
/// so a caller that only remembers the original name must search by suffix).
fn resolve_download_path(uploads_dir: &StdPath, filename: &str) -> Option<PathBuf> {
    let exact = uploads_dir.join(filename);
    if exact.is_file() {
        return Some(exact);
    }

    let suffix = format!("_{filename}");
    let mut best: Option<(SystemTime, PathBuf)> = None;
    for entry in std::fs::read_dir(uploads_dir).ok()?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.ends_with(&suffix) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    best.map(|(_, path)| path)
}

#[tracing::instrument(skip_all, target = HANDLER_TARGET, name = "download_file", fields(filename = %filename))]
async fn download_file(
    State(state): State<ServiceState>,
    AxumPath(filename): AxumPath<String>,
    Query(params): Query<DownloadParams>,
    request: Request,
) -> Result<Response> {
    let resolved = resolve_download_path(state.uploads_dir(), &filename)
        .ok_or_else(|| Error::new(ErrorKind::NotFound).with_message(format!("no output file for {filename}")))?;

    if params.delete_after_download.unwrap_or(false) {
        let served_name = resolved.file_name().and_then(|n| n.to_str()).unwrap_or(&filename);
        if state.registry().has_fresh_cached_output(served_name).await {
            // This result is reused across every caller sharing the upload's
            // fingerprint (spec.md §4.B dedup). Deleting it out from under
            // another caller's cached completion would leave their
            // `downloadPath` dangling, so the option is rejected up front
            // rather than honored for a cached/shared result.
            return Err(Error::new(ErrorKind::Conflict).with_message(format!(
                "deleteAfterDownload is not supported for {filename}: this result is cached and shared with other callers"
            )));
        }
    }

    let served = ServeFile::new(&resolved).oneshot(request).await;
    let mut response = match served {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    };

    response
        .headers_mut()
        .insert(axum::http::header::CONTENT_TYPE, axum::http::HeaderValue::from_static("application/pdf"));
    if let Some(name) = resolved.file_name().and_then(|n| n.to_str()) {
        if let Ok(value) = axum::http::HeaderValue::from_str(&format!("attachment; filename=\"{name}\"")) {
            response.headers_mut().insert(axum::http::header::CONTENT_DISPOSITION, value);
        }
    }

    if params.delete_after_download.unwrap_or(false) {
        if let Err(err) = std::fs::remove_file(&resolved) {
            tracing::debug!(target: HANDLER_TARGET, path = %resolved.display(), error = %err, "deleteAfterDownload cleanup failed");
        }
    }

    Ok(response)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: Timestamp,
    service: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "Healthy",
        timestamp: Timestamp::now(),
        service: "sheetbuilder-server",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_download_path_prefers_exact_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.pdf"), b"exact").unwrap();
        std::fs::write(dir.path().join("abc123_report.pdf"), b"suffixed").unwrap();

        let resolved = resolve_download_path(dir.path(), "report.pdf").unwrap();
        assert_eq!(resolved.file_name().unwrap().to_str().unwrap(), "report.pdf");
    }

    #[test]
    fn resolve_download_path_falls_back_to_suffix_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc123_report_A180_REV.pdf"), b"one").unwrap();

        let resolved = resolve_download_path(dir.path(), "report_A180_REV.pdf").unwrap();
        assert_eq!(resolved.file_name().unwrap().to_str().unwrap(), "abc123_report_A180_REV.pdf");
    }

    #[test]
    fn resolve_download_path_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(resolve_download_path(dir.path(), "missing.pdf").is_none());
    }

    #[tokio::test]
    async fn health_reports_healthy() {
        let Json(body) = health().await;
        assert_eq!(body.status, "Healthy");
        assert_eq!(body.service, "sheetbuilder-server");
    }
}
