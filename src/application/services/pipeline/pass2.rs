//! Pass 2: stream the manifest back from disk and dispatch strips and image
//! crops to the vision backends under a bounded worker pool.

use std::collections::HashMap;
use std::path::Path;

use futures::stream::{self, StreamExt};

use crate::application::ports::PdfRenderer;
use crate::application::services::matcher::{parse_batch_response, strip_block_markers};
use crate::application::services::prompts::{build_image_prompt, build_strip_prompt, PromptVars};
use crate::domain::{Block, OcrOutcome, ResultRecord};

use super::manifest::{cleanup_manifest_files, load_manifest, CropEntry, StripEntry};
use super::{
    send_progress, ControlSignal, Dispatcher, JobControl, PhaseOutcome, PipelineConfig,
    PipelineError, PipelinePhase, ProgressSender,
};

enum Unit {
    Strip(StripEntry),
    Image(CropEntry),
}

#[allow(clippy::too_many_arguments)]
pub async fn pass2_dispatch(
    renderer: &dyn PdfRenderer,
    pdf: &[u8],
    doc_name: &str,
    blocks: &[Block],
    manifest_path: &Path,
    dispatcher: &Dispatcher,
    cfg: &PipelineConfig,
    records: &mut HashMap<String, ResultRecord>,
    progress: &ProgressSender,
    control: &dyn JobControl,
) -> Result<PhaseOutcome<()>, PipelineError> {
    let pages = load_manifest(manifest_path)
        .await
        .map_err(|e| PipelineError::Manifest(e.to_string()))?;

    let blocks_by_id: HashMap<&str, &Block> =
        blocks.iter().map(|b| (b.id.as_str(), b)).collect();

    let mut units: Vec<Unit> = Vec::new();
    for page in pages {
        for strip in page.strips {
            units.push(Unit::Strip(strip));
        }
        for image in page.images {
            units.push(Unit::Image(image));
        }
    }

    let total_units = units.len();
    if total_units == 0 {
        return Ok(PhaseOutcome::Completed(()));
    }

    tracing::info!(
        units = total_units,
        workers = cfg.ocr_threads_per_job,
        "Pass 2 dispatch started"
    );

    let blocks_by_id = &blocks_by_id;
    let work = stream::iter(units.into_iter().map(|unit| async move {
        match unit {
            Unit::Strip(entry) => process_strip(&entry, dispatcher, cfg).await,
            Unit::Image(entry) => {
                process_image(&entry, renderer, pdf, doc_name, blocks_by_id, dispatcher, cfg)
                    .await
            }
        }
    }));
    let mut completions = work.buffer_unordered(cfg.ocr_threads_per_job.max(1));

    let mut completed = 0usize;
    let mut interrupted: Option<ControlSignal> = None;

    while let Some((unit_records, message)) = completions.next().await {
        for record in unit_records {
            records.insert(record.block_id.clone(), record);
        }
        completed += 1;
        send_progress(
            progress,
            PipelinePhase::Dispatch,
            completed as f32 / total_units as f32,
            message,
        );

        match control.checkpoint().await {
            ControlSignal::Continue => {}
            signal => {
                interrupted = Some(signal);
                break;
            }
        }
    }
    drop(completions);

    if let Some(signal) = interrupted {
        // Pause leaves crops and the manifest on disk for inspection; cancel
        // tears the whole workspace down one level up.
        return Ok(PhaseOutcome::Interrupted(signal));
    }

    cleanup_manifest_files(manifest_path).await;
    tracing::info!(completed, "Pass 2 dispatch complete");

    Ok(PhaseOutcome::Completed(()))
}

async fn process_strip(
    entry: &StripEntry,
    dispatcher: &Dispatcher,
    cfg: &PipelineConfig,
) -> (Vec<ResultRecord>, String) {
    let message = format!(
        "Recognized {} ({} blocks)",
        entry.strip_id,
        entry.block_ids.len()
    );

    let png = match tokio::fs::read(&entry.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let records = entry
                .block_ids
                .iter()
                .map(|id| ResultRecord::failed(id, format!("strip crop unreadable: {e}")))
                .collect();
            return (records, message);
        }
    };

    let prompt = build_strip_prompt(&entry.block_ids);

    let permit = dispatcher
        .limiter
        .acquire(std::time::Duration::from_secs(cfg.rate_limit_timeout_s))
        .await;
    if permit.is_none() {
        let records = entry
            .block_ids
            .iter()
            .map(|id| ResultRecord::failed(id, "rate limiter timeout"))
            .collect();
        return (records, message);
    }

    let response = dispatcher
        .strip_backend
        .recognize(&png, &prompt, None)
        .await;
    drop(permit);

    let records = match response {
        Ok(text) => {
            let parsed = parse_batch_response(&entry.block_ids, &text, cfg.fuzzy_threshold);
            entry
                .block_ids
                .iter()
                .map(|id| match parsed.get(id) {
                    Some(text) if !text.is_empty() => ResultRecord::ok(id, text.clone()),
                    _ => ResultRecord::missing(id),
                })
                .collect()
        }
        Err(e) => {
            tracing::warn!(strip_id = %entry.strip_id, error = %e, "Strip recognition failed");
            entry
                .block_ids
                .iter()
                .map(|id| ResultRecord::failed(id, e.to_string()))
                .collect()
        }
    };

    (records, message)
}

async fn process_image(
    entry: &CropEntry,
    renderer: &dyn PdfRenderer,
    pdf: &[u8],
    doc_name: &str,
    blocks_by_id: &HashMap<&str, &Block>,
    dispatcher: &Dispatcher,
    cfg: &PipelineConfig,
) -> (Vec<ResultRecord>, String) {
    let message = format!("Recognized image block {} (page {})", entry.block_id, entry.page_index + 1);

    let Some(block) = blocks_by_id.get(entry.block_id.as_str()) else {
        return (Vec::new(), message);
    };

    let png = match tokio::fs::read(&entry.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            return (
                vec![ResultRecord::failed(
                    &entry.block_id,
                    format!("image crop unreadable: {e}"),
                )],
                message,
            );
        }
    };

    // The embedded text layer feeds the prompt; absence is not an error.
    let pdf_text = renderer
        .extract_region_text(pdf, entry.page_index, block.coords_norm)
        .await
        .unwrap_or_default();

    let vars = PromptVars {
        doc_name: doc_name.to_string(),
        page_index: entry.page_index,
        block_id: entry.block_id.clone(),
        hint: block.hint.clone(),
        pdf_text,
    };
    let prompt = build_image_prompt(&vars);

    let backend = if entry.is_stamp {
        &dispatcher.stamp_backend
    } else {
        &dispatcher.image_backend
    };

    let permit = dispatcher
        .limiter
        .acquire(std::time::Duration::from_secs(cfg.rate_limit_timeout_s))
        .await;
    if permit.is_none() {
        return (
            vec![ResultRecord::failed(&entry.block_id, "rate limiter timeout")],
            message,
        );
    }

    let response = backend.recognize(&png, &prompt, None).await;
    drop(permit);

    let record = match response {
        Ok(text) => {
            let cleaned = strip_block_markers(&text);
            if cleaned.is_empty() {
                ResultRecord::missing(&entry.block_id)
            } else {
                ResultRecord {
                    block_id: entry.block_id.clone(),
                    text: Some(cleaned),
                    status: OcrOutcome::Ok,
                    failure_reason: None,
                }
            }
        }
        Err(e) => {
            tracing::warn!(block_id = %entry.block_id, error = %e, "Image recognition failed");
            ResultRecord::failed(&entry.block_id, e.to_string())
        }
    };

    (vec![record], message)
}
