//! Verification pass: every requested block absent from the first OCR result
//! gets one single-block retry. The verification phase itself is not retried.

use std::collections::HashMap;
use std::io::Cursor;

use image::ImageFormat;

use crate::application::ports::PdfRenderer;
use crate::application::services::matcher::strip_block_markers;
use crate::application::services::pipeline::{
    send_progress, ControlSignal, Dispatcher, JobControl, PhaseOutcome, PipelineConfig,
    PipelineError, PipelinePhase, ProgressSender,
};
use crate::application::services::prompts::{build_single_block_prompt, PromptVars};
use crate::domain::{Block, BlockType, OcrOutcome, ResultRecord};

#[allow(clippy::too_many_arguments)]
pub async fn verify_and_retry(
    renderer: &dyn PdfRenderer,
    pdf: &[u8],
    doc_name: &str,
    blocks: &[Block],
    dispatcher: &Dispatcher,
    cfg: &PipelineConfig,
    records: &mut HashMap<String, ResultRecord>,
    progress: &ProgressSender,
    control: &dyn JobControl,
) -> Result<PhaseOutcome<()>, PipelineError> {
    let mut missing: Vec<&Block> = blocks
        .iter()
        .filter(|b| {
            records
                .get(&b.id)
                .map(|r| r.status.needs_retry())
                .unwrap_or(true)
        })
        .collect();

    if missing.is_empty() {
        tracing::info!("Verification: all requested blocks recognized");
        return Ok(PhaseOutcome::Completed(()));
    }

    tracing::warn!(count = missing.len(), "Verification: re-issuing missing blocks");
    missing.sort_by_key(|b| (b.page_index, b.id.clone()));

    let total = missing.len();
    // One page raster at a time; blocks are page-ordered so re-renders are rare.
    let mut cached_page: Option<(u32, image::DynamicImage)> = None;

    for (i, block) in missing.into_iter().enumerate() {
        match control.checkpoint().await {
            ControlSignal::Continue => {}
            signal => return Ok(PhaseOutcome::Interrupted(signal)),
        }

        if !matches!(&cached_page, Some((page, _)) if *page == block.page_index) {
            let raster = renderer
                .render_page(pdf, block.page_index, cfg.render_dpi)
                .await?;
            cached_page = Some((block.page_index, raster));
        }
        let Some((_, raster)) = &cached_page else {
            continue;
        };

        let record = retry_single_block(block, raster, renderer, pdf, doc_name, dispatcher, cfg)
            .await;
        records.insert(block.id.clone(), record);

        send_progress(
            progress,
            PipelinePhase::Verify,
            (i + 1) as f32 / total as f32,
            format!("Verifying block {}", block.id),
        );
    }

    Ok(PhaseOutcome::Completed(()))
}

async fn retry_single_block(
    block: &Block,
    raster: &image::DynamicImage,
    renderer: &dyn PdfRenderer,
    pdf: &[u8],
    doc_name: &str,
    dispatcher: &Dispatcher,
    cfg: &PipelineConfig,
) -> ResultRecord {
    let (x1, y1, x2, y2) = block.pixel_rect(raster.width(), raster.height());
    let cx1 = x1.clamp(0, i64::from(raster.width()));
    let cy1 = y1.clamp(0, i64::from(raster.height()));
    let cx2 = x2.clamp(0, i64::from(raster.width()));
    let cy2 = y2.clamp(0, i64::from(raster.height()));
    if cx2 <= cx1 || cy2 <= cy1 {
        return ResultRecord::failed(&block.id, "degenerate crop region");
    }

    let crop = raster.crop_imm(
        cx1 as u32,
        cy1 as u32,
        (cx2 - cx1) as u32,
        (cy2 - cy1) as u32,
    );
    let mut png: Vec<u8> = Vec::new();
    if let Err(e) = crop.write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
        return ResultRecord::failed(&block.id, format!("crop encode: {e}"));
    }

    let pdf_text = if block.block_type == BlockType::Image {
        renderer
            .extract_region_text(pdf, block.page_index, block.coords_norm)
            .await
            .unwrap_or_default()
    } else {
        String::new()
    };

    let vars = PromptVars {
        doc_name: doc_name.to_string(),
        page_index: block.page_index,
        block_id: block.id.clone(),
        hint: block.hint.clone(),
        pdf_text,
    };
    let prompt = build_single_block_prompt(block, &vars);

    // The retry keeps the backend family of the original call: strips for
    // text/table, the image (or stamp) backend for figures.
    let backend = if block.is_stamp() {
        &dispatcher.stamp_backend
    } else if block.block_type == BlockType::Image {
        &dispatcher.image_backend
    } else {
        &dispatcher.strip_backend
    };

    let permit = dispatcher
        .limiter
        .acquire(std::time::Duration::from_secs(cfg.rate_limit_timeout_s))
        .await;
    if permit.is_none() {
        return ResultRecord::failed(&block.id, "rate limiter timeout");
    }

    let response = backend.recognize(&png, &prompt, None).await;
    drop(permit);

    match response {
        Ok(text) => {
            let cleaned = strip_block_markers(&text);
            if cleaned.is_empty() {
                ResultRecord::failed(&block.id, "retry returned empty text")
            } else {
                tracing::info!(block_id = %block.id, "Block recovered on retry");
                ResultRecord {
                    block_id: block.id.clone(),
                    text: Some(cleaned),
                    status: OcrOutcome::RetriedOk,
                    failure_reason: None,
                }
            }
        }
        Err(e) => ResultRecord::failed(&block.id, format!("retry failed: {e}")),
    }
}
