use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use varberg::application::ports::{OcrBackend, OcrBackendError, OcrPrompt};
use varberg::application::services::pipeline::{
    load_manifest, pass1_prepare_crops, pass2_dispatch, ControlSignal, Dispatcher, JobControl,
    NeverInterrupt, PhaseOutcome, PipelineConfig, ProgressEvent,
};
use varberg::application::services::RateLimiter;
use varberg::domain::{Block, BlockType, OcrOutcome, ResultRecord, ShapeType};
use varberg::infrastructure::ocr::EchoBackend;
use varberg::infrastructure::pdf::MockPdfRenderer;

const PAGE_W: f64 = 612.0;
const PAGE_H: f64 = 792.0;

fn block(id: &str, page_index: u32, block_type: BlockType, y1: f64, y2: f64) -> Block {
    Block {
        id: id.to_string(),
        page_index,
        block_type,
        shape_type: ShapeType::Rectangle,
        coords_px: [61.0, y1, 551.0, y2],
        coords_norm: [0.1, y1 / PAGE_H, 0.9, y2 / PAGE_H],
        polygon_points: None,
        hint: None,
        category: None,
        group_id: None,
    }
}

fn test_config() -> PipelineConfig {
    PipelineConfig {
        render_dpi: 72,
        strip_merge_gap_px: 20,
        strip_max_height_px: 6000,
        ocr_threads_per_job: 2,
        fuzzy_threshold: 2,
        rate_limit_timeout_s: 5,
    }
}

struct CountingBackend {
    inner: EchoBackend,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrBackend for CountingBackend {
    async fn recognize(
        &self,
        image_png: &[u8],
        prompt: &OcrPrompt,
        json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.recognize(image_png, prompt, json_mode).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

fn dispatcher(calls: Arc<AtomicUsize>) -> Dispatcher {
    let backend: Arc<dyn OcrBackend> = Arc::new(CountingBackend {
        inner: EchoBackend::new(),
        calls,
    });
    Dispatcher {
        strip_backend: Arc::clone(&backend),
        image_backend: Arc::clone(&backend),
        stamp_backend: backend,
        limiter: Arc::new(RateLimiter::new("test", 1000, 8)),
    }
}

fn progress_channel() -> (
    mpsc::UnboundedSender<ProgressEvent>,
    mpsc::UnboundedReceiver<ProgressEvent>,
) {
    mpsc::unbounded_channel()
}

/// Happy path: two text blocks with a 20px gap merge into one strip, the
/// image block gets its own crop, and Pass 2 issues exactly two backend
/// calls for three recognized blocks.
#[tokio::test]
async fn given_two_pages_when_pipeline_runs_then_one_strip_and_one_image_crop() {
    let renderer = MockPdfRenderer::new(2, PAGE_W, PAGE_H);
    let blocks = vec![
        block("AAAA-BBBB-001", 0, BlockType::Text, 100.0, 180.0),
        block("AAAA-BBBB-002", 0, BlockType::Text, 200.0, 280.0),
        block("AAAA-BBBB-003", 1, BlockType::Image, 300.0, 500.0),
    ];
    let workspace = tempfile::tempdir().unwrap();
    let cfg = test_config();
    let (tx, mut rx) = progress_channel();

    let summary = match pass1_prepare_crops(
        &renderer,
        b"%PDF",
        &blocks,
        workspace.path(),
        &cfg,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap()
    {
        PhaseOutcome::Completed(summary) => summary,
        PhaseOutcome::Interrupted(_) => panic!("pass 1 interrupted"),
    };

    assert_eq!(summary.total_units, 2);
    assert_eq!(summary.total_pages, 2);
    assert!(summary.degenerate.is_empty());

    let pages = load_manifest(&summary.manifest_path).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].strips.len(), 1);
    assert_eq!(
        pages[0].strips[0].block_ids,
        vec!["AAAA-BBBB-001".to_string(), "AAAA-BBBB-002".to_string()]
    );
    assert!(pages[0].images.is_empty());
    assert_eq!(pages[1].images.len(), 1);
    assert!(pages[1].strips.is_empty());

    let calls = Arc::new(AtomicUsize::new(0));
    let mut records: HashMap<String, ResultRecord> = blocks
        .iter()
        .map(|b| (b.id.clone(), ResultRecord::missing(&b.id)))
        .collect();

    let outcome = pass2_dispatch(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &summary.manifest_path,
        &dispatcher(Arc::clone(&calls)),
        &cfg,
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();
    assert!(matches!(outcome, PhaseOutcome::Completed(())));

    assert_eq!(calls.load(Ordering::SeqCst), 2, "one strip + one image call");
    for b in &blocks {
        let record = &records[&b.id];
        assert_eq!(record.status, OcrOutcome::Ok, "block {} not ok", b.id);
        assert!(record.text.as_deref().unwrap_or("").contains(&b.id));
    }

    // Crops and manifest are removed after the last completion.
    assert!(!summary.manifest_path.exists());

    drop(tx);
    let mut saw_dispatch_progress = false;
    while let Some(event) = rx.recv().await {
        assert!((0.0..=1.0).contains(&event.fraction));
        saw_dispatch_progress = true;
    }
    assert!(saw_dispatch_progress);
}

#[tokio::test]
async fn given_wide_vertical_gap_then_blocks_land_in_separate_strips() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let blocks = vec![
        block("AAAA-BBBB-001", 0, BlockType::Text, 100.0, 180.0),
        // 120px below the previous block: beyond the merge gap.
        block("AAAA-BBBB-002", 0, BlockType::Text, 300.0, 360.0),
    ];
    let workspace = tempfile::tempdir().unwrap();
    let (tx, _rx) = progress_channel();

    let summary = match pass1_prepare_crops(
        &renderer,
        b"%PDF",
        &blocks,
        workspace.path(),
        &test_config(),
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap()
    {
        PhaseOutcome::Completed(summary) => summary,
        PhaseOutcome::Interrupted(_) => panic!("pass 1 interrupted"),
    };

    let pages = load_manifest(&summary.manifest_path).await.unwrap();
    assert_eq!(pages[0].strips.len(), 2);
}

#[tokio::test]
async fn given_degenerate_block_then_it_is_failed_and_never_dispatched() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let mut zero_area = block("AAAA-BBBB-009", 0, BlockType::Text, 100.0, 180.0);
    zero_area.coords_norm = [0.4, 0.2, 0.4, 0.3];
    let blocks = vec![
        zero_area,
        block("AAAA-BBBB-001", 0, BlockType::Text, 300.0, 360.0),
    ];
    let workspace = tempfile::tempdir().unwrap();
    let cfg = test_config();
    let (tx, _rx) = progress_channel();

    let summary = match pass1_prepare_crops(
        &renderer,
        b"%PDF",
        &blocks,
        workspace.path(),
        &cfg,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap()
    {
        PhaseOutcome::Completed(summary) => summary,
        PhaseOutcome::Interrupted(_) => panic!("pass 1 interrupted"),
    };

    assert_eq!(summary.degenerate.len(), 1);
    assert_eq!(summary.degenerate[0].block_id, "AAAA-BBBB-009");
    assert_eq!(summary.degenerate[0].status, OcrOutcome::Failed);

    let pages = load_manifest(&summary.manifest_path).await.unwrap();
    let mentioned: Vec<&String> = pages
        .iter()
        .flat_map(|p| p.strips.iter().flat_map(|s| s.block_ids.iter()))
        .collect();
    assert!(!mentioned.iter().any(|id| id.as_str() == "AAAA-BBBB-009"));
}

#[tokio::test]
async fn given_empty_blocks_list_then_both_passes_complete_trivially() {
    let renderer = MockPdfRenderer::new(3, PAGE_W, PAGE_H);
    let workspace = tempfile::tempdir().unwrap();
    let cfg = test_config();
    let (tx, _rx) = progress_channel();

    let summary = match pass1_prepare_crops(
        &renderer,
        b"%PDF",
        &[],
        workspace.path(),
        &cfg,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap()
    {
        PhaseOutcome::Completed(summary) => summary,
        PhaseOutcome::Interrupted(_) => panic!("pass 1 interrupted"),
    };
    assert_eq!(summary.total_units, 0);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut records = HashMap::new();
    let outcome = pass2_dispatch(
        &renderer,
        b"%PDF",
        "empty.pdf",
        &[],
        &summary.manifest_path,
        &dispatcher(Arc::clone(&calls)),
        &cfg,
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();

    assert!(matches!(outcome, PhaseOutcome::Completed(())));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

struct PauseAfter {
    countdown: AtomicUsize,
}

#[async_trait]
impl JobControl for PauseAfter {
    async fn checkpoint(&self) -> ControlSignal {
        if self.countdown.fetch_sub(1, Ordering::SeqCst) == 0 {
            ControlSignal::Pause
        } else {
            ControlSignal::Continue
        }
    }
}

/// Pause during Pass 2: the worker finishes the in-flight unit, stops at the
/// next checkpoint, and leaves crops plus manifest on disk.
#[tokio::test]
async fn given_pause_signal_mid_dispatch_then_pipeline_stops_at_checkpoint() {
    let renderer = MockPdfRenderer::new(4, PAGE_W, PAGE_H);
    let blocks: Vec<Block> = (0..4)
        .map(|i| {
            block(
                &format!("AAAA-BBBB-00{}", i + 1),
                i,
                BlockType::Text,
                100.0,
                180.0,
            )
        })
        .collect();
    let workspace = tempfile::tempdir().unwrap();
    let cfg = test_config();
    let (tx, _rx) = progress_channel();

    let summary = match pass1_prepare_crops(
        &renderer,
        b"%PDF",
        &blocks,
        workspace.path(),
        &cfg,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap()
    {
        PhaseOutcome::Completed(summary) => summary,
        PhaseOutcome::Interrupted(_) => panic!("pass 1 interrupted"),
    };
    assert_eq!(summary.total_units, 4);

    let calls = Arc::new(AtomicUsize::new(0));
    let mut records: HashMap<String, ResultRecord> = blocks
        .iter()
        .map(|b| (b.id.clone(), ResultRecord::missing(&b.id)))
        .collect();

    let control = PauseAfter {
        countdown: AtomicUsize::new(1),
    };
    let outcome = pass2_dispatch(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &summary.manifest_path,
        &dispatcher(Arc::clone(&calls)),
        &cfg,
        &mut records,
        &tx,
        &control,
    )
    .await
    .unwrap();

    assert!(matches!(
        outcome,
        PhaseOutcome::Interrupted(ControlSignal::Pause)
    ));
    // Paused runs keep their workspace; nothing is cleaned yet.
    assert!(summary.manifest_path.exists());
    let completed = records
        .values()
        .filter(|r| r.status == OcrOutcome::Ok)
        .count();
    assert!(completed < blocks.len());
}
