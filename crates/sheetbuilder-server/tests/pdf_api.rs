//! End-to-end scenarios against the full router (spec.md §8): happy path,
//! duplicate active, duplicate completed, and the legacy size gate.

use std::path::Path;
use std::time::Duration;

use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use jiff::SignedDuration;
use lopdf::{Dictionary, Document, Object};
use serde_json::Value;
use sheetbuilder_compose::ComposeConfig;
use sheetbuilder_jobs::RegistryConfig;
use sheetbuilder_server::{create_router, ServiceState};

/// Builds a minimal valid multi-page letter-size PDF and returns its bytes.
/// Every page is blank (empty content stream) — composition only needs
/// `MediaBox` to determine placement, not visible content.
fn sample_pdf_bytes(pages: usize) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("source.pdf");

    let mut doc = Document::with_version("1.5");
    let mut page_ids = Vec::with_capacity(pages);

    for _ in 0..pages {
        let content_id = doc.add_object(Object::Stream(lopdf::Stream::new(Dictionary::new(), Vec::new())));
        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![Object::Integer(0), Object::Integer(0), Object::Integer(612), Object::Integer(792)]),
        );
        page_dict.set("Contents", Object::Reference(content_id));
        page_dict.set("Resources", Object::Dictionary(Dictionary::new()));
        page_ids.push(doc.add_object(Object::Dictionary(page_dict)));
    }

    let pages_id = doc.new_object_id();
    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(page_ids.len() as i64));
    pages_dict.set("Kids", Object::Array(page_ids.iter().copied().map(Object::Reference).collect()));
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    for &page_id in &page_ids {
        if let Ok(dict) = doc.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            dict.set("Parent", Object::Reference(pages_id));
        }
    }

    let catalog_id = doc.new_object_id();
    let mut catalog = Dictionary::new();
    catalog.set("Type", Object::Name(b"Catalog".to_vec()));
    catalog.set("Pages", Object::Reference(pages_id));
    doc.objects.insert(catalog_id, Object::Dictionary(catalog));
    doc.trailer.set("Root", Object::Reference(catalog_id));

    doc.save(&path).unwrap();
    std::fs::read(&path).unwrap()
}

fn test_server(uploads_dir: &Path) -> TestServer {
    let state = ServiceState::new(
        RegistryConfig::default(),
        ComposeConfig::default(),
        uploads_dir.to_path_buf(),
        SignedDuration::from_hours(24 * 7),
    );
    TestServer::new(create_router(state)).unwrap()
}

fn submission_form(bytes: &[u8], file_name: &str, rotation: u16, order: &str) -> MultipartForm {
    MultipartForm::new()
        .add_part("pdfFile", Part::bytes(bytes.to_vec()).file_name(file_name).mime_type("application/pdf"))
        .add_text("rotationAngle", rotation.to_string())
        .add_text("order", order)
}

async fn poll_until_terminal(server: &TestServer, job_id: &str) -> Value {
    for _ in 0..200 {
        let response = server.get(&format!("/api/pdf/status/{job_id}")).await;
        let body: Value = response.json();
        if body["stage"] == "Completed" || body["stage"] == "Failed" {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached a terminal stage");
}

#[tokio::test]
async fn happy_path_completes_and_is_downloadable() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path());
    let bytes = sample_pdf_bytes(3);

    let response = server
        .post("/api/pdf/process-with-progress")
        .multipart(submission_form(&bytes, "report.pdf", 180, "Rev"))
        .await;
    response.assert_status_ok();
    let submit: Value = response.json();
    assert_eq!(submit["success"], true);
    let job_id = submit["jobId"].as_str().unwrap().to_string();

    let status = poll_until_terminal(&server, &job_id).await;
    assert_eq!(status["stage"], "Completed");
    let result = &status["result"];
    assert_eq!(result["inputPages"], 3);
    assert_eq!(result["outputPages"], 1);
    let download_path = result["downloadPath"].as_str().unwrap();
    assert!(!download_path.is_empty());

    let download = server.get(download_path).await;
    download.assert_status_ok();
    assert!(!download.as_bytes().is_empty());
}

#[tokio::test]
async fn duplicate_active_shares_the_same_job_id() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path());
    let bytes = sample_pdf_bytes(3);

    let (first, second) = tokio::join!(
        server.post("/api/pdf/process-with-progress").multipart(submission_form(&bytes, "shared.pdf", 0, "Norm")),
        server.post("/api/pdf/process-with-progress").multipart(submission_form(&bytes, "shared.pdf", 0, "Norm")),
    );

    let first: Value = first.json();
    let second: Value = second.json();
    assert_eq!(first["jobId"], second["jobId"]);

    poll_until_terminal(&server, first["jobId"].as_str().unwrap()).await;
}

#[tokio::test]
async fn duplicate_completed_embeds_the_prior_result() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path());
    let bytes = sample_pdf_bytes(1);

    let first = server
        .post("/api/pdf/process-with-progress")
        .multipart(submission_form(&bytes, "once.pdf", 0, "Norm"))
        .await
        .json::<Value>();
    let job_id = first["jobId"].as_str().unwrap().to_string();
    let completed = poll_until_terminal(&server, &job_id).await;

    let resubmit = server
        .post("/api/pdf/process-with-progress")
        .multipart(submission_form(&bytes, "once.pdf", 0, "Norm"))
        .await
        .json::<Value>();

    assert_eq!(resubmit["jobId"], job_id);
    assert_eq!(resubmit["duplicateOf"], true);
    assert_eq!(resubmit["result"], completed["result"]);
}

#[tokio::test]
async fn legacy_endpoint_blocks_oversized_uploads() {
    let dir = tempfile::tempdir().unwrap();
    let state = ServiceState::new(
        RegistryConfig {
            large_file_threshold_bytes: 1024,
            ..RegistryConfig::default()
        },
        ComposeConfig::default(),
        dir.path().to_path_buf(),
        SignedDuration::from_hours(24 * 7),
    );
    let server = TestServer::new(create_router(state)).unwrap();

    let oversized = vec![0u8; 2048];
    let response = server
        .post("/api/pdf/process")
        .multipart(submission_form(&oversized, "huge.pdf", 0, "Norm"))
        .await;

    response.assert_status(axum::http::StatusCode::CONFLICT);
    let body: Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["requiredEndpoint"], "/api/pdf/process-with-progress");
}

#[tokio::test]
async fn status_of_unknown_job_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path());

    let response = server.get("/api/pdf/status/does-not-exist").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let dir = tempfile::tempdir().unwrap();
    let server = test_server(dir.path());

    let response = server.get("/api/pdf/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "Healthy");
}
