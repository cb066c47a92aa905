//! Builds and publishes the durable outputs of a finished job: result.md,
//! annotation.json, result.zip and per-block crop PDFs, registered as job
//! files and (when the job is tied to a tree node) as node files.

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::application::ports::{
    ArtifactStore, ArtifactStoreError, JobStore, JobStoreError, TreeStore, TreeStoreError,
};
use crate::domain::{
    AnnotatedBlock, AnnotationDocument, AnnotationPage, Block, BlockType, Job, JobFile,
    JobFileType, NodeFile, OcrOutcome, ResultRecord,
};

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("object store: {0}")]
    Store(#[from] ArtifactStoreError),
    #[error("metadata store: {0}")]
    Meta(#[from] JobStoreError),
    #[error("tree store: {0}")]
    Tree(#[from] TreeStoreError),
    #[error("archive: {0}")]
    Zip(String),
    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub struct ArtifactBuilder {
    artifacts: Arc<dyn ArtifactStore>,
    jobs: Arc<dyn JobStore>,
    tree: Arc<dyn TreeStore>,
}

impl ArtifactBuilder {
    pub fn new(
        artifacts: Arc<dyn ArtifactStore>,
        jobs: Arc<dyn JobStore>,
        tree: Arc<dyn TreeStore>,
    ) -> Self {
        Self {
            artifacts,
            jobs,
            tree,
        }
    }

    /// Assemble, upload and register every artifact of a completed job.
    /// Uploads are keyed under the job's artifact prefix and idempotent:
    /// re-running a job overwrites the same keys.
    pub async fn publish(
        &self,
        job: &Job,
        blocks: &[Block],
        records: &HashMap<String, ResultRecord>,
        page_dims: &HashMap<u32, (f64, f64)>,
        crop_pdfs: &[(String, PathBuf)],
    ) -> Result<AnnotationDocument, ArtifactError> {
        let annotation = build_annotation(&job.document_name, blocks, records, page_dims);
        let annotation_json = annotation.to_json()?;
        let result_md = build_result_markdown(&job.document_name, blocks, records);

        let mut crop_files: Vec<(String, String, Vec<u8>)> = Vec::new();
        for (block_id, path) in crop_pdfs {
            match tokio::fs::read(path).await {
                Ok(bytes) => {
                    crop_files.push((block_id.clone(), format!("crops/{block_id}.pdf"), bytes));
                }
                Err(e) => {
                    tracing::warn!(block_id = %block_id, error = %e, "Crop PDF missing at publish");
                }
            }
        }

        let zip_bytes = build_result_zip(&result_md, &annotation_json, &crop_files)?;

        let prefix = job.artifact_prefix.trim_end_matches('/');

        let md_key = format!("{prefix}/result.md");
        self.artifacts.upload_text(&md_key, &result_md).await?;
        self.record_file(
            job,
            JobFileType::ResultMd,
            &md_key,
            "result.md",
            result_md.len() as u64,
            None,
        )
        .await?;

        let annotation_key = format!("{prefix}/annotation.json");
        self.artifacts
            .upload_text(&annotation_key, &annotation_json)
            .await?;
        self.record_file(
            job,
            JobFileType::Annotation,
            &annotation_key,
            "annotation.json",
            annotation_json.len() as u64,
            None,
        )
        .await?;

        let zip_key = format!("{prefix}/result.zip");
        let zip_len = zip_bytes.len() as u64;
        self.artifacts
            .upload(&zip_key, Bytes::from(zip_bytes))
            .await?;
        self.record_file(job, JobFileType::ResultZip, &zip_key, "result.zip", zip_len, None)
            .await?;

        let blocks_by_id: HashMap<&str, &Block> =
            blocks.iter().map(|b| (b.id.as_str(), b)).collect();
        for (block_id, rel_key, bytes) in crop_files {
            let key = format!("{prefix}/{rel_key}");
            let size = bytes.len() as u64;
            self.artifacts.upload(&key, Bytes::from(bytes)).await?;
            let metadata = blocks_by_id.get(block_id.as_str()).map(|b| {
                serde_json::json!({
                    "block_id": b.id,
                    "page_index": b.page_index,
                    "coords_norm": b.coords_norm,
                    "block_type": b.block_type.as_str(),
                })
            });
            self.record_file(
                job,
                JobFileType::Crop,
                &key,
                &format!("{block_id}.pdf"),
                size,
                metadata,
            )
            .await?;
        }

        tracing::info!(
            job_id = %job.id,
            prefix,
            crops = crop_pdfs.len(),
            "Artifacts published"
        );

        Ok(annotation)
    }

    async fn record_file(
        &self,
        job: &Job,
        file_type: JobFileType,
        key: &str,
        file_name: &str,
        size: u64,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), ArtifactError> {
        let mut file = JobFile::new(job.id, file_type, key, file_name, size);
        if let Some(metadata) = metadata {
            file = file.with_metadata(metadata);
        }
        self.jobs.append_job_file(&file).await?;

        if let Some(node_id) = &job.node_id {
            self.tree
                .register_node_file(&NodeFile {
                    node_id: node_id.clone(),
                    file_type: file_type.as_str().to_string(),
                    object_key: key.to_string(),
                    file_name: file_name.to_string(),
                    size,
                })
                .await?;
        }
        Ok(())
    }
}

/// Version-2 annotation: pages ascending, blocks in their input order, every
/// requested block present exactly once with OCR text or a failure marker.
pub fn build_annotation(
    pdf_path: &str,
    blocks: &[Block],
    records: &HashMap<String, ResultRecord>,
    page_dims: &HashMap<u32, (f64, f64)>,
) -> AnnotationDocument {
    let mut page_order: Vec<u32> = Vec::new();
    let mut by_page: HashMap<u32, Vec<&Block>> = HashMap::new();
    for block in blocks {
        if !by_page.contains_key(&block.page_index) {
            page_order.push(block.page_index);
        }
        by_page.entry(block.page_index).or_default().push(block);
    }
    page_order.sort_unstable();

    let pages = page_order
        .into_iter()
        .map(|page_index| {
            let (width, height) = page_dims.get(&page_index).copied().unwrap_or((0.0, 0.0));
            let blocks = by_page
                .remove(&page_index)
                .unwrap_or_default()
                .into_iter()
                .map(|block| {
                    let record = records.get(&block.id);
                    let status = record.map(|r| r.status).unwrap_or(OcrOutcome::Missing);
                    AnnotatedBlock {
                        block: block.clone(),
                        ocr_text: record.and_then(|r| r.text.clone()),
                        ocr_status: status.as_str().to_string(),
                        source: "remote_ocr".to_string(),
                    }
                })
                .collect();
            AnnotationPage {
                page_number: page_index,
                width,
                height,
                blocks,
            }
        })
        .collect();

    AnnotationDocument::new(pdf_path, pages)
}

/// Structured Markdown: blocks in page order, top-to-bottom within a page.
pub fn build_result_markdown(
    doc_name: &str,
    blocks: &[Block],
    records: &HashMap<String, ResultRecord>,
) -> String {
    let mut out = format!("# {doc_name}\n");

    if blocks.is_empty() {
        out.push_str("\nNo blocks to process.\n");
        return out;
    }

    let mut by_page: std::collections::BTreeMap<u32, Vec<&Block>> = Default::default();
    for block in blocks {
        by_page.entry(block.page_index).or_default().push(block);
    }

    for (page_index, mut page_blocks) in by_page {
        out.push_str(&format!("\n## Page {}\n", page_index + 1));
        page_blocks.sort_by(|a, b| {
            a.coords_norm[1]
                .partial_cmp(&b.coords_norm[1])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        for block in page_blocks {
            out.push('\n');
            let record = records.get(&block.id);
            let text = record.and_then(|r| r.text.as_deref());
            match (block.block_type, text) {
                (BlockType::Image, Some(text)) => {
                    out.push_str(&format!("### Figure {}\n\n{}\n\n", block.id, text));
                    out.push_str(&format!("[crop](crops/{}.pdf)\n", block.id));
                }
                (BlockType::Image, None) => {
                    out.push_str(&format!("### Figure {}\n\n", block.id));
                    out.push_str(&failure_marker(record));
                    out.push_str(&format!("\n[crop](crops/{}.pdf)\n", block.id));
                }
                (_, Some(text)) => {
                    out.push_str(text);
                    out.push('\n');
                }
                (_, None) => {
                    out.push_str(&failure_marker(record));
                    out.push('\n');
                }
            }
        }
    }

    out
}

fn failure_marker(record: Option<&ResultRecord>) -> String {
    let reason = record
        .and_then(|r| r.failure_reason.as_deref())
        .unwrap_or("no recognition result");
    format!("> [OCR failed: {reason}]\n")
}

/// result.zip: result.md + annotation.json + crops/{block_id}.pdf.
pub fn build_result_zip(
    result_md: &str,
    annotation_json: &str,
    crops: &[(String, String, Vec<u8>)],
) -> Result<Vec<u8>, ArtifactError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    writer
        .start_file("result.md", options)
        .map_err(|e| ArtifactError::Zip(e.to_string()))?;
    writer.write_all(result_md.as_bytes())?;

    writer
        .start_file("annotation.json", options)
        .map_err(|e| ArtifactError::Zip(e.to_string()))?;
    writer.write_all(annotation_json.as_bytes())?;

    for (_, rel_key, bytes) in crops {
        writer
            .start_file(rel_key.as_str(), options)
            .map_err(|e| ArtifactError::Zip(e.to_string()))?;
        writer.write_all(bytes)?;
    }

    let cursor = writer
        .finish()
        .map_err(|e| ArtifactError::Zip(e.to_string()))?;
    Ok(cursor.into_inner())
}
