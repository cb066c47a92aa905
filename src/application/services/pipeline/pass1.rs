//! Pass 1: render pages one at a time, crop requested regions to disk,
//! append the manifest. Trades RAM for disk so arbitrarily large PDFs fit.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::imageops;
use image::{DynamicImage, Rgba, RgbaImage};

use crate::application::ports::PdfRenderer;
use crate::domain::{Block, ResultRecord};

use super::manifest::{CropEntry, ManifestWriter, PageManifest, StripEntry};
use super::{
    send_progress, ControlSignal, JobControl, PhaseOutcome, PipelineConfig, PipelineError,
    PipelinePhase, ProgressSender,
};

pub struct Pass1Summary {
    pub manifest_path: PathBuf,
    pub total_units: usize,
    pub total_pages: usize,
    /// Zero-area crops, recorded failed and never dispatched.
    pub degenerate: Vec<ResultRecord>,
    /// Per-block single-page crop PDFs, kept for the artifact phase.
    pub crop_pdfs: Vec<(String, PathBuf)>,
}

struct PendingCrop<'a> {
    block: &'a Block,
    image: DynamicImage,
    y1: i64,
    y2: i64,
}

pub async fn pass1_prepare_crops(
    renderer: &dyn PdfRenderer,
    pdf: &[u8],
    blocks: &[Block],
    workspace: &Path,
    cfg: &PipelineConfig,
    progress: &ProgressSender,
    control: &dyn JobControl,
) -> Result<PhaseOutcome<Pass1Summary>, PipelineError> {
    let crops_dir = workspace.join("crops");
    let strips_dir = crops_dir.join("strips");
    let images_dir = crops_dir.join("images");
    let pdf_crops_dir = crops_dir.join("pdf");
    for dir in [&crops_dir, &strips_dir, &images_dir, &pdf_crops_dir] {
        tokio::fs::create_dir_all(dir).await?;
    }

    let manifest_path = crops_dir.join("manifest.jsonl");
    let mut manifest = ManifestWriter::create(&manifest_path).await?;

    // Pages with zero requested blocks are skipped entirely.
    let mut blocks_by_page: BTreeMap<u32, Vec<&Block>> = BTreeMap::new();
    for block in blocks {
        blocks_by_page.entry(block.page_index).or_default().push(block);
    }

    let total_pages = blocks_by_page.len();
    let mut summary = Pass1Summary {
        manifest_path: manifest_path.clone(),
        total_units: 0,
        total_pages,
        degenerate: Vec::new(),
        crop_pdfs: Vec::new(),
    };

    let mut strip_counter = 0usize;
    let mut processed_pages = 0usize;

    for (&page_index, page_blocks) in &blocks_by_page {
        match control.checkpoint().await {
            ControlSignal::Continue => {}
            signal => return Ok(PhaseOutcome::Interrupted(signal)),
        }

        let raster = renderer.render_page(pdf, page_index, cfg.render_dpi).await?;
        let (raster_w, raster_h) = (raster.width(), raster.height());

        let mut strip_eligible: Vec<PendingCrop<'_>> = Vec::new();
        let mut image_entries: Vec<CropEntry> = Vec::new();

        for &block in page_blocks {
            let (x1, y1, x2, y2) = block.pixel_rect(raster_w, raster_h);
            let cx1 = x1.clamp(0, i64::from(raster_w));
            let cy1 = y1.clamp(0, i64::from(raster_h));
            let cx2 = x2.clamp(0, i64::from(raster_w));
            let cy2 = y2.clamp(0, i64::from(raster_h));

            if cx2 <= cx1 || cy2 <= cy1 {
                tracing::warn!(
                    block_id = %block.id,
                    page_index,
                    "Degenerate crop region, marking failed"
                );
                summary
                    .degenerate
                    .push(ResultRecord::failed(&block.id, "degenerate crop region"));
                continue;
            }

            let crop = raster.crop_imm(
                cx1 as u32,
                cy1 as u32,
                (cx2 - cx1) as u32,
                (cy2 - cy1) as u32,
            );

            match renderer
                .crop_region_pdf(pdf, page_index, block.coords_norm, 2.0)
                .await
            {
                Ok(bytes) => {
                    let pdf_path = pdf_crops_dir.join(format!("{}.pdf", block.id));
                    tokio::fs::write(&pdf_path, bytes).await?;
                    summary.crop_pdfs.push((block.id.clone(), pdf_path));
                }
                Err(e) => {
                    tracing::warn!(block_id = %block.id, error = %e, "Crop PDF skipped");
                }
            }

            if block.block_type.is_strip_eligible() {
                strip_eligible.push(PendingCrop {
                    block,
                    image: crop,
                    y1: cy1,
                    y2: cy2,
                });
            } else {
                let path = images_dir.join(format!("{}.png", block.id));
                let (w, h) = (crop.width(), crop.height());
                crop.save(&path)
                    .map_err(|e| PipelineError::Manifest(format!("crop save: {e}")))?;
                image_entries.push(CropEntry {
                    block_id: block.id.clone(),
                    block_type: block.block_type,
                    page_index,
                    path,
                    width: w,
                    height: h,
                    is_stamp: block.is_stamp(),
                });
            }
        }

        let strips = merge_into_strips(
            strip_eligible,
            &strips_dir,
            cfg,
            &mut strip_counter,
        )?;

        summary.total_units += strips.len() + image_entries.len();

        manifest
            .append(&PageManifest {
                page_index,
                raster_width: raster_w,
                raster_height: raster_h,
                strips,
                images: image_entries,
            })
            .await?;

        processed_pages += 1;
        send_progress(
            progress,
            PipelinePhase::RenderCrops,
            processed_pages as f32 / total_pages.max(1) as f32,
            format!("Cropping page {} of {}", processed_pages, total_pages),
        );
        // Raster dropped here; peak memory stays one page.
    }

    tracing::info!(
        pages = total_pages,
        units = summary.total_units,
        degenerate = summary.degenerate.len(),
        manifest = %manifest.path().display(),
        "Pass 1 complete"
    );

    Ok(PhaseOutcome::Completed(summary))
}

/// Sort top-to-bottom by y1, then merge runs whose vertical gap stays within
/// `strip_merge_gap_px` and whose stacked height stays within
/// `strip_max_height_px`. Each run becomes one merged crop on disk.
fn merge_into_strips(
    mut crops: Vec<PendingCrop<'_>>,
    strips_dir: &Path,
    cfg: &PipelineConfig,
    strip_counter: &mut usize,
) -> Result<Vec<StripEntry>, PipelineError> {
    crops.sort_by_key(|c| c.y1);

    let gap = i64::from(cfg.strip_merge_gap_px);
    let max_height = i64::from(cfg.strip_max_height_px);

    let mut strips = Vec::new();
    let mut run: Vec<PendingCrop<'_>> = Vec::new();
    let mut run_height: i64 = 0;

    let mut flush =
        |run: &mut Vec<PendingCrop<'_>>, run_height: &mut i64| -> Result<(), PipelineError> {
            if run.is_empty() {
                return Ok(());
            }
            *strip_counter += 1;
            let strip_id = format!("strip_{:04}", strip_counter);
            let path = strips_dir.join(format!("{strip_id}.png"));
            let entry = save_merged_strip(run, &strip_id, &path, cfg.strip_merge_gap_px)?;
            strips.push(entry);
            run.clear();
            *run_height = 0;
            Ok(())
        };

    for crop in crops {
        let crop_height = i64::from(crop.image.height());
        if let Some(last) = run.last() {
            let vertical_gap = crop.y1 - last.y2;
            let merged_height = run_height + gap + crop_height;
            if vertical_gap > gap || merged_height > max_height {
                flush(&mut run, &mut run_height)?;
            }
        }
        let separator = if run.is_empty() { 0 } else { gap };
        run_height += separator + crop_height;
        run.push(crop);
    }
    flush(&mut run, &mut run_height)?;

    Ok(strips)
}

/// Stack member crops vertically on a white canvas with solid black separator
/// bars, so the model can tell block boundaries apart.
fn save_merged_strip(
    run: &[PendingCrop<'_>],
    strip_id: &str,
    path: &Path,
    gap_px: u32,
) -> Result<StripEntry, PipelineError> {
    let width = run.iter().map(|c| c.image.width()).max().unwrap_or(1);
    let height: u32 = run.iter().map(|c| c.image.height()).sum::<u32>()
        + gap_px * (run.len().saturating_sub(1)) as u32;

    let mut canvas = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
    let bar = RgbaImage::from_pixel(width, gap_px.max(1), Rgba([0, 0, 0, 255]));

    let mut y: i64 = 0;
    for (i, crop) in run.iter().enumerate() {
        if i > 0 {
            imageops::replace(&mut canvas, &bar, 0, y);
            y += i64::from(gap_px);
        }
        imageops::replace(&mut canvas, &crop.image.to_rgba8(), 0, y);
        y += i64::from(crop.image.height());
    }

    DynamicImage::ImageRgba8(canvas)
        .save(path)
        .map_err(|e| PipelineError::Manifest(format!("strip save: {e}")))?;

    Ok(StripEntry {
        strip_id: strip_id.to_string(),
        path: path.to_path_buf(),
        block_ids: run.iter().map(|c| c.block.id.clone()).collect(),
        width,
        height,
    })
}
