use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

use varberg::application::ports::{ArtifactStore, JobStore, TreeStore};
use varberg::application::services::{
    build_annotation, build_result_markdown, build_result_zip, ArtifactBuilder,
};
use varberg::domain::{
    Block, BlockType, EngineKind, Job, JobFileType, JobStatus, OcrOutcome, ResultRecord, ShapeType,
};
use varberg::infrastructure::persistence::MemoryMetadataStore;
use varberg::infrastructure::storage::MemoryArtifactStore;

fn block(id: &str, page_index: u32, block_type: BlockType, y1: f64) -> Block {
    Block {
        id: id.to_string(),
        page_index,
        block_type,
        shape_type: ShapeType::Rectangle,
        coords_px: [61.0, y1, 551.0, y1 + 80.0],
        coords_norm: [0.1, y1 / 792.0, 0.9, (y1 + 80.0) / 792.0],
        polygon_points: None,
        hint: None,
        category: None,
        group_id: None,
    }
}

fn records_for(blocks: &[Block]) -> HashMap<String, ResultRecord> {
    blocks
        .iter()
        .map(|b| {
            (
                b.id.clone(),
                ResultRecord::ok(&b.id, format!("text of {}", b.id)),
            )
        })
        .collect()
}

#[test]
fn result_markdown_orders_blocks_by_page_then_reading_order() {
    let blocks = vec![
        block("AAAA-BBBB-002", 0, BlockType::Text, 400.0),
        block("AAAA-BBBB-001", 0, BlockType::Text, 100.0),
        block("AAAA-BBBB-003", 1, BlockType::Image, 100.0),
    ];
    let records = records_for(&blocks);

    let markdown = build_result_markdown("contract.pdf", &blocks, &records);

    let first = markdown.find("text of AAAA-BBBB-001").unwrap();
    let second = markdown.find("text of AAAA-BBBB-002").unwrap();
    let third = markdown.find("text of AAAA-BBBB-003").unwrap();
    assert!(first < second && second < third);

    assert!(markdown.contains("## Page 1"));
    assert!(markdown.contains("## Page 2"));
    assert!(markdown.contains("### Figure AAAA-BBBB-003"));
    assert!(markdown.contains("crops/AAAA-BBBB-003.pdf"));
}

#[test]
fn result_markdown_marks_failed_blocks_explicitly() {
    let blocks = vec![block("AAAA-BBBB-001", 0, BlockType::Text, 100.0)];
    let mut records = HashMap::new();
    records.insert(
        "AAAA-BBBB-001".to_string(),
        ResultRecord::failed("AAAA-BBBB-001", "rate limiter timeout"),
    );

    let markdown = build_result_markdown("contract.pdf", &blocks, &records);
    assert!(markdown.contains("[OCR failed: rate limiter timeout]"));
}

#[test]
fn empty_block_list_produces_empty_artifacts() {
    let records = HashMap::new();
    let markdown = build_result_markdown("contract.pdf", &[], &records);
    assert!(markdown.contains("No blocks to process"));

    let annotation = build_annotation("contract.pdf", &[], &records, &HashMap::new());
    assert_eq!(annotation.block_count(), 0);
}

#[test]
fn zip_contains_markdown_annotation_and_crops() {
    let crops = vec![(
        "AAAA-BBBB-003".to_string(),
        "crops/AAAA-BBBB-003.pdf".to_string(),
        b"%PDF-1.4 fake".to_vec(),
    )];
    let bytes = build_result_zip("# md", "{}", &crops).unwrap();

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes)).unwrap();
    let names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    assert!(names.contains(&"result.md".to_string()));
    assert!(names.contains(&"annotation.json".to_string()));
    assert!(names.contains(&"crops/AAAA-BBBB-003.pdf".to_string()));

    let mut markdown = String::new();
    archive
        .by_name("result.md")
        .unwrap()
        .read_to_string(&mut markdown)
        .unwrap();
    assert_eq!(markdown, "# md");
}

#[tokio::test]
async fn publish_registers_every_artifact_and_node_files() {
    let meta = Arc::new(MemoryMetadataStore::new());
    let artifacts = Arc::new(MemoryArtifactStore::new());

    let node = meta.create_node("project", None).await.unwrap();

    let job = Job::new(
        "client-1".to_string(),
        "doc-hash".to_string(),
        "contract.pdf".to_string(),
        "run".to_string(),
        EngineKind::Echo,
        JobStatus::Processing,
        Some(node.id.clone()),
    );
    meta.insert_job(&job).await.unwrap();

    let blocks = vec![
        block("AAAA-BBBB-001", 0, BlockType::Text, 100.0),
        block("AAAA-BBBB-003", 1, BlockType::Image, 100.0),
    ];
    let records = records_for(&blocks);
    let page_dims = HashMap::from([(0u32, (612.0, 792.0)), (1u32, (612.0, 792.0))]);

    let crop_dir = tempfile::tempdir().unwrap();
    let crop_path = crop_dir.path().join("AAAA-BBBB-003.pdf");
    std::fs::write(&crop_path, b"%PDF-1.4 fake").unwrap();
    let crop_pdfs = vec![("AAAA-BBBB-003".to_string(), crop_path)];

    let builder = ArtifactBuilder::new(
        artifacts.clone() as Arc<dyn ArtifactStore>,
        meta.clone() as Arc<dyn JobStore>,
        meta.clone() as Arc<dyn TreeStore>,
    );

    let annotation = builder
        .publish(&job, &blocks, &records, &page_dims, &crop_pdfs)
        .await
        .unwrap();
    assert_eq!(annotation.block_count(), 2);

    // Every done-job artifact exists in the object store and is registered.
    let prefix = job.artifact_prefix.trim_end_matches('/');
    for suffix in ["result.md", "annotation.json", "result.zip"] {
        let key = format!("{prefix}/{suffix}");
        assert!(artifacts.exists(&key).await.unwrap(), "missing {key}");
    }

    for file_type in [
        JobFileType::ResultMd,
        JobFileType::Annotation,
        JobFileType::ResultZip,
    ] {
        let file = meta.get_job_file(job.id, file_type).await.unwrap();
        assert!(file.is_some(), "job file {file_type} not registered");
    }

    let crop_file = meta.get_job_file(job.id, JobFileType::Crop).await.unwrap();
    let metadata = crop_file.unwrap().metadata.unwrap();
    assert_eq!(metadata["block_id"], "AAAA-BBBB-003");
    assert_eq!(metadata["block_type"], "image");

    let node_files = meta.list_node_files(&node.id).await.unwrap();
    assert_eq!(node_files.len(), 4, "md, annotation, zip and one crop");

    // Publishing twice stays idempotent at the node level.
    builder
        .publish(&job, &blocks, &records, &page_dims, &crop_pdfs)
        .await
        .unwrap();
    let node_files = meta.list_node_files(&node.id).await.unwrap();
    assert_eq!(node_files.len(), 4);

    // Deleting the job removes job files but never node files.
    meta.delete_job(job.id).await.unwrap();
    assert!(meta.list_job_files(job.id).await.unwrap().is_empty());
    assert_eq!(meta.list_node_files(&node.id).await.unwrap().len(), 4);
}
