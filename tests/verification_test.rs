use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use varberg::application::ports::{OcrBackend, OcrBackendError, OcrPrompt};
use varberg::application::services::pipeline::{Dispatcher, NeverInterrupt, PipelineConfig};
use varberg::application::services::{build_annotation, verify_and_retry, RateLimiter};
use varberg::domain::{Block, BlockType, OcrOutcome, ResultRecord, ShapeType};
use varberg::infrastructure::pdf::MockPdfRenderer;

const PAGE_W: f64 = 612.0;
const PAGE_H: f64 = 792.0;

fn block(id: &str, block_type: BlockType) -> Block {
    Block {
        id: id.to_string(),
        page_index: 0,
        block_type,
        shape_type: ShapeType::Rectangle,
        coords_px: [61.0, 100.0, 551.0, 180.0],
        coords_norm: [0.1, 100.0 / PAGE_H, 0.9, 180.0 / PAGE_H],
        polygon_points: None,
        hint: None,
        category: None,
        group_id: None,
    }
}

/// Succeeds or fails every single-block retry, counting calls.
struct RetryBackend {
    calls: Arc<AtomicUsize>,
    succeed: bool,
}

#[async_trait]
impl OcrBackend for RetryBackend {
    async fn recognize(
        &self,
        _image_png: &[u8],
        _prompt: &OcrPrompt,
        _json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.succeed {
            Ok("recovered text".to_string())
        } else {
            Err(OcrBackendError::BadResponse("still broken".to_string()))
        }
    }

    fn name(&self) -> &'static str {
        "retry-test"
    }
}

fn dispatcher(calls: Arc<AtomicUsize>, succeed: bool) -> Dispatcher {
    let backend: Arc<dyn OcrBackend> = Arc::new(RetryBackend { calls, succeed });
    Dispatcher {
        strip_backend: Arc::clone(&backend),
        image_backend: Arc::clone(&backend),
        stamp_backend: backend,
        limiter: Arc::new(RateLimiter::new("test", 1000, 8)),
    }
}

fn cfg() -> PipelineConfig {
    PipelineConfig {
        render_dpi: 72,
        rate_limit_timeout_s: 5,
        ..PipelineConfig::default()
    }
}

#[tokio::test]
async fn given_missing_block_when_retry_succeeds_then_marked_retried_ok() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let blocks = vec![
        block("XYZ-AAAA-001", BlockType::Text),
        block("XYZ-AAAA-003", BlockType::Text),
    ];

    // The strip response covered 001 but omitted 003.
    let mut records: HashMap<String, ResultRecord> = HashMap::new();
    records.insert(
        "XYZ-AAAA-001".to_string(),
        ResultRecord::ok("XYZ-AAAA-001", "first text"),
    );
    records.insert(
        "XYZ-AAAA-003".to_string(),
        ResultRecord::missing("XYZ-AAAA-003"),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, _rx) = mpsc::unbounded_channel();

    verify_and_retry(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &dispatcher(Arc::clone(&calls), true),
        &cfg(),
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();

    // Only the missing block was re-issued, as a single-block call.
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(records["XYZ-AAAA-003"].status, OcrOutcome::RetriedOk);
    assert_eq!(
        records["XYZ-AAAA-003"].text.as_deref(),
        Some("recovered text")
    );
    assert_eq!(records["XYZ-AAAA-001"].status, OcrOutcome::Ok);
}

#[tokio::test]
async fn given_retry_also_fails_then_block_stays_failed_with_marker_in_annotation() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let blocks = vec![block("XYZ-AAAA-003", BlockType::Text)];

    let mut records: HashMap<String, ResultRecord> = HashMap::new();
    records.insert(
        "XYZ-AAAA-003".to_string(),
        ResultRecord::missing("XYZ-AAAA-003"),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, _rx) = mpsc::unbounded_channel();

    verify_and_retry(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &dispatcher(Arc::clone(&calls), false),
        &cfg(),
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "verification is not retried");
    assert_eq!(records["XYZ-AAAA-003"].status, OcrOutcome::Failed);

    // The block still appears in the annotation with a null text and an
    // explicit failure status.
    let page_dims = HashMap::from([(0u32, (PAGE_W, PAGE_H))]);
    let annotation = build_annotation("contract.pdf", &blocks, &records, &page_dims);
    assert_eq!(annotation.block_count(), 1);
    let annotated = &annotation.pages[0].blocks[0];
    assert!(annotated.ocr_text.is_none());
    assert_eq!(annotated.ocr_status, "failed");
}

#[tokio::test]
async fn given_all_blocks_recognized_then_verification_is_a_no_op() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let blocks = vec![block("XYZ-AAAA-001", BlockType::Text)];

    let mut records: HashMap<String, ResultRecord> = HashMap::new();
    records.insert(
        "XYZ-AAAA-001".to_string(),
        ResultRecord::ok("XYZ-AAAA-001", "text"),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, _rx) = mpsc::unbounded_channel();

    verify_and_retry(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &dispatcher(Arc::clone(&calls), true),
        &cfg(),
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn given_failed_pass2_block_then_verification_retries_it_too() {
    let renderer = MockPdfRenderer::new(1, PAGE_W, PAGE_H);
    let blocks = vec![block("XYZ-AAAA-007", BlockType::Image)];

    let mut records: HashMap<String, ResultRecord> = HashMap::new();
    records.insert(
        "XYZ-AAAA-007".to_string(),
        ResultRecord::failed("XYZ-AAAA-007", "backend exploded"),
    );

    let calls = Arc::new(AtomicUsize::new(0));
    let (tx, _rx) = mpsc::unbounded_channel();

    verify_and_retry(
        &renderer,
        b"%PDF",
        "contract.pdf",
        &blocks,
        &dispatcher(Arc::clone(&calls), true),
        &cfg(),
        &mut records,
        &tx,
        &NeverInterrupt,
    )
    .await
    .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(records["XYZ-AAAA-007"].status, OcrOutcome::RetriedOk);
}
