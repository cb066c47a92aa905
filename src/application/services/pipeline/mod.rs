//! Two-pass memory-bounded OCR pipeline.
//!
//! Pass 1 streams the PDF page by page, cropping requested regions to disk
//! and appending a manifest line per page; at no point is more than one
//! rendered page held in memory. Pass 2 reads the manifest back and dispatches
//! crops to vision backends under a bounded worker pool.

pub mod manifest;

mod pass1;
mod pass2;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::application::ports::{OcrBackend, PdfRenderError};
use crate::application::services::rate_limiter::RateLimiter;

pub use manifest::{cleanup_manifest_files, load_manifest, PageManifest};
pub use pass1::{pass1_prepare_crops, Pass1Summary};
pub use pass2::pass2_dispatch;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub render_dpi: u32,
    pub strip_merge_gap_px: u32,
    pub strip_max_height_px: u32,
    pub ocr_threads_per_job: usize,
    pub fuzzy_threshold: usize,
    pub rate_limit_timeout_s: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            render_dpi: 300,
            strip_merge_gap_px: 20,
            strip_max_height_px: 6000,
            ocr_threads_per_job: 2,
            fuzzy_threshold: 2,
            rate_limit_timeout_s: 300,
        }
    }
}

/// Cooperative pause/cancel signal, polled at checkpoints: end of a page in
/// Pass 1, every completion in Pass 2, between phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Continue,
    Pause,
    Cancel,
}

#[async_trait]
pub trait JobControl: Send + Sync {
    async fn checkpoint(&self) -> ControlSignal;
}

/// Control that never interrupts; used by tests and one-shot runs.
pub struct NeverInterrupt;

#[async_trait]
impl JobControl for NeverInterrupt {
    async fn checkpoint(&self) -> ControlSignal {
        ControlSignal::Continue
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelinePhase {
    RenderCrops,
    Dispatch,
    Verify,
    Publish,
}

/// Raw phase-relative progress; the worker maps phases onto the job's global
/// progress window.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub phase: PipelinePhase,
    pub fraction: f32,
    pub message: String,
}

pub type ProgressSender = mpsc::UnboundedSender<ProgressEvent>;

pub(crate) fn send_progress(
    progress: &ProgressSender,
    phase: PipelinePhase,
    fraction: f32,
    message: impl Into<String>,
) {
    let _ = progress.send(ProgressEvent {
        phase,
        fraction: fraction.clamp(0.0, 1.0),
        message: message.into(),
    });
}

/// Routes crops to the backends selected for this job. Every outbound call
/// passes through the process-global limiter first.
#[derive(Clone)]
pub struct Dispatcher {
    pub strip_backend: Arc<dyn OcrBackend>,
    pub image_backend: Arc<dyn OcrBackend>,
    pub stamp_backend: Arc<dyn OcrBackend>,
    pub limiter: Arc<RateLimiter>,
}

/// Outcome of one pipeline phase.
pub enum PhaseOutcome<T> {
    Completed(T),
    Interrupted(ControlSignal),
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("render: {0}")]
    Render(#[from] PdfRenderError),
    #[error("workspace io: {0}")]
    Io(#[from] std::io::Error),
    #[error("manifest: {0}")]
    Manifest(String),
}
