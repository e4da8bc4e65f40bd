//! The Sheet Composition Worker: reads a stored upload, packs pages onto
//! fixed-width variable-height sheets, applies rotation, writes the output,
//! and emits progress throughout (spec.md §4.D).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use lopdf::{Dictionary, Document, Object, ObjectId};
use sheetbuilder_core::{Error, FingerprintDigest, JobId, JobResult, Order, ProgressEvent, Result, Stage};
use sheetbuilder_jobs::{Broker, Registry};

use crate::config::ComposeConfig;
use crate::lru::LruCache;
use crate::pack::{self, RotationCache};
use crate::pdf;

const COMPOSE_TARGET: &str = "sheetbuilder_compose::worker";

/// Everything the worker needs to process one submission.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub job_id: JobId,
    pub fingerprint_digest: FingerprintDigest,
    pub upload_path: PathBuf,
    pub original_file_name: String,
    pub rotation_degrees: u16,
    pub order: Order,
    pub uploads_dir: PathBuf,
}

/// Runs composition for `request` to completion, reporting the terminal
/// outcome to both the broker and the registry, then cleaning up staged
/// files regardless of outcome.
///
/// Errors raised during composition never propagate out of this function:
/// they are caught here and converted into `failJob`/`mark_failed`, matching
/// the propagation policy of spec.md §7 — the submission response has
/// already returned a jobId by the time this task runs.
#[tracing::instrument(skip_all, target = COMPOSE_TARGET, name = "compose_worker", fields(job_id = %request.job_id, order = ?request.order, rotation = request.rotation_degrees))]
pub async fn run(request: ComposeRequest, broker: Broker, registry: Registry, config: ComposeConfig) {
    let start = Instant::now();
    let reversed_path = reversed_copy_path(&request.upload_path);

    let outcome = execute(&request, &broker, &config, start, reversed_path.as_deref()).await;

    match outcome {
        Ok(result) => {
            tracing::info!(target: COMPOSE_TARGET, job_id = %request.job_id, "composition completed");
            broker.complete_job(&request.job_id, result.clone()).await;
            registry
                .mark_completed(request.fingerprint_digest, &request.job_id, result)
                .await;
        }
        Err(err) => {
            tracing::warn!(target: COMPOSE_TARGET, job_id = %request.job_id, error = %err, "composition failed");
            broker.fail_job(&request.job_id, err.message().to_string()).await;
            registry.mark_failed(request.fingerprint_digest, &request.job_id).await;
        }
    }

    cleanup(&request.upload_path, reversed_path.as_deref());
}

async fn execute(
    request: &ComposeRequest,
    broker: &Broker,
    config: &ComposeConfig,
    start: Instant,
    reversed_path: Option<&Path>,
) -> Result<JobResult> {
    broker
        .update_stage(&request.job_id, Stage::Initializing, "starting")
        .await;

    let source_path: &Path = match (request.order, reversed_path) {
        (Order::Rev, Some(reversed)) => {
            let source = pdf::open_document(&request.upload_path)?;
            pdf::write_reversed_copy(&source, reversed)?;
            reversed
        }
        _ => &request.upload_path,
    };

    let source_doc = pdf::open_document(source_path)?;
    let page_ids = pdf::ordered_page_ids(&source_doc);
    let total_pages = page_ids.len() as u32;

    broker
        .update_stage(&request.job_id, Stage::PreparingDimensions, "reading page dimensions")
        .await;

    let mut dims = Vec::with_capacity(page_ids.len());
    for (i, &page_id) in page_ids.iter().enumerate() {
        dims.push(pdf::page_dimensions(&source_doc, page_id)?);
        if (i + 1) % 100 == 0 {
            let fraction = (i + 1) as f64 / total_pages.max(1) as f64;
            emit(
                broker,
                &request.job_id,
                Stage::PreparingDimensions,
                (i + 1) as u32,
                total_pages,
                interpolate(5.0, 10.0, fraction),
                "reading page dimensions",
                start,
            )
            .await;
        }
    }

    let standard_height = pack::compute_standard_sheet_height(&dims, config.max_sheet_height_pt)?;
    let sheets = pack::pack_sheets(&dims, config.sheet_width_pt, standard_height, config.max_sheet_height_pt)?;

    broker
        .update_stage(&request.job_id, Stage::ProcessingPages, "composing sheets")
        .await;

    let mut output_doc = Document::with_version("1.5");
    let mut page_cache: LruCache<usize, ObjectId, _> =
        LruCache::new(config.page_cache_capacity, |_evicted_xobject_id| {});
    let mut imported = HashMap::new();
    let mut rotation_cache = RotationCache::new();
    let rotation = rotation_cache.get_or_compute(request.rotation_degrees);

    let mut output_page_ids = Vec::with_capacity(sheets.len());
    let report_every = (total_pages / 50).max(10);
    let mut pages_done = 0u32;

    for sheet in &sheets {
        let mut named_xobjects: Vec<(ObjectId, String, f32, f32, f32, f32)> = Vec::with_capacity(sheet.placements.len());

        for placement in &sheet.placements {
            let page_id = page_ids[placement.page_index];
            let bbox = (placement.width, placement.height);
            let xobject_id = *page_cache.get_or_try_insert_with(placement.page_index, || {
                pdf::import_page_as_form_xobject(&mut output_doc, &source_doc, page_id, bbox, &mut imported)
            })?;
            named_xobjects.push((
                xobject_id,
                format!("X{}", placement.page_index),
                placement.x_offset,
                placement.y,
                placement.width,
                placement.height,
            ));

            pages_done += 1;
            if pages_done % report_every == 0 {
                let elapsed = start.elapsed().as_secs_f64().max(0.001);
                let pages_per_second = pages_done as f64 / elapsed;
                let eta = (total_pages - pages_done).max(0) as f64 / pages_per_second.max(0.1);
                let mut evt = ProgressEvent::for_stage_transition(
                    request.job_id.clone(),
                    Stage::ProcessingPages,
                    "composing sheets",
                );
                evt.current_page = pages_done;
                evt.total_pages = total_pages;
                evt.percent_complete = interpolate(10.0, 90.0, pages_done as f64 / total_pages.max(1) as f64);
                evt.pages_per_second = pages_per_second;
                evt.eta_seconds = eta;
                evt.elapsed_seconds = elapsed;
                evt.perf.cache_hits = page_cache.hits();
                evt.perf.cache_misses = page_cache.misses();
                evt.perf.cache_hit_ratio = page_cache.hit_ratio();
                evt.perf.cached_objects = page_cache.len();
                evt.perf.sheets_generated = output_page_ids.len() as u64;
                broker.update_progress(&request.job_id, evt).await;
            }
        }

        let refs: Vec<(ObjectId, &str, f32, f32, f32, f32)> = named_xobjects
            .iter()
            .map(|(id, name, x, y, w, h)| (*id, name.as_str(), *x, *y, *w, *h))
            .collect();
        let content = pdf::build_sheet_content(&refs, request.rotation_degrees, rotation);
        let content_data = content
            .encode()
            .map_err(|e| Error::processing(format!("failed to encode sheet content stream: {e}")))?;
        let content_id = output_doc.add_object(Object::Stream(lopdf::Stream::new(Dictionary::new(), content_data)));

        let mut resources = Dictionary::new();
        let mut xobject_dict = Dictionary::new();
        for (id, name, ..) in &named_xobjects {
            xobject_dict.set(name.as_str(), Object::Reference(*id));
        }
        resources.set("XObject", Object::Dictionary(xobject_dict));

        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Real(0.0),
                Object::Real(0.0),
                Object::Real(config.sheet_width_pt),
                Object::Real(sheet.canvas_height),
            ]),
        );
        page_dict.set("Resources", Object::Dictionary(resources));
        page_dict.set("Contents", Object::Reference(content_id));

        let page_id = output_doc.add_object(Object::Dictionary(page_dict));
        output_page_ids.push(page_id);
    }

    broker
        .update_stage(&request.job_id, Stage::OptimizingOutput, "finalizing output")
        .await;

    finalize_document(&mut output_doc, &output_page_ids, config.sheet_width_pt)?;

    let output_file_name = format!(
        "{}_{}_A{}_{}.pdf",
        request.job_id,
        strip_extension(&request.original_file_name),
        request.rotation_degrees,
        request.order.as_str()
    );
    let output_path = request.uploads_dir.join(&output_file_name);
    output_doc
        .save(&output_path)
        .map_err(|e| Error::storage(format!("failed to write output PDF: {e}")).with_source(e))?;

    broker
        .update_stage(&request.job_id, Stage::Finalizing, "done")
        .await;

    Ok(JobResult {
        success: true,
        message: "composition completed".to_string(),
        output_file_name: output_file_name.clone(),
        download_path: format!("/api/pdf/download/{}", urlencoding_escape(&output_file_name)),
        processing_time_millis: start.elapsed().as_millis() as u64,
        input_pages: total_pages,
        output_pages: output_page_ids.len() as u32,
    })
}

fn finalize_document(doc: &mut Document, page_ids: &[ObjectId], _sheet_width: f32) -> Result<()> {
    let pages_id = doc.new_object_id();
    let mut pages_dict = Dictionary::new();
    pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
    pages_dict.set("Count", Object::Integer(page_ids.len() as i64));
    pages_dict.set(
        "Kids",
        Object::Array(page_ids.iter().copied().map(Object::Reference).collect()),
    );
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    for &page_id in page_ids {
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
    Ok(())
}

async fn emit(
    broker: &Broker,
    job_id: &JobId,
    stage: Stage,
    current_page: u32,
    total_pages: u32,
    percent_complete: f64,
    operation: &str,
    start: Instant,
) {
    let mut evt = ProgressEvent::for_stage_transition(job_id.clone(), stage, operation);
    evt.current_page = current_page;
    evt.total_pages = total_pages;
    evt.percent_complete = percent_complete;
    evt.elapsed_seconds = start.elapsed().as_secs_f64();
    broker.update_progress(job_id, evt).await;
}

fn interpolate(low: f64, high: f64, fraction: f64) -> f64 {
    low + (high - low) * fraction.clamp(0.0, 1.0)
}

fn reversed_copy_path(upload_path: &Path) -> Option<PathBuf> {
    let file_name = upload_path.file_name()?.to_string_lossy();
    Some(upload_path.with_file_name(format!("{file_name}.reversed.pdf")))
}

fn strip_extension(file_name: &str) -> &str {
    file_name.strip_suffix(".pdf").unwrap_or(file_name)
}

fn urlencoding_escape(name: &str) -> String {
    // Percent-encode the characters that would otherwise break a URL path
    // segment; the output filename is otherwise a plain ASCII-safe name.
    name.chars()
        .map(|c| match c {
            ' ' => "%20".to_string(),
            '#' => "%23".to_string(),
            '?' => "%3F".to_string(),
            other => other.to_string(),
        })
        .collect()
}

/// Deletes the stored upload and any intermediate reversed file. Missing
/// files and IO errors are logged and swallowed: cleanup failure must not
/// mask a successful job or change a failed job's error (spec.md §4.D step
/// 7).
fn cleanup(upload_path: &Path, reversed_path: Option<&Path>) {
    for path in std::iter::once(upload_path).chain(reversed_path) {
        if let Err(err) = std::fs::remove_file(path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(target: COMPOSE_TARGET, path = %path.display(), error = %err, "cleanup failed, swallowing");
            }
        }
    }
}
