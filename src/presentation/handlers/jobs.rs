use std::str::FromStr;
use std::time::Duration;

use axum::extract::{Multipart, Path, Query, State};
use axum::{Form, Json};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{
    AnnotationDocument, Block, BlockType, EngineKind, Job, JobFile, JobFileType, JobId,
    JobSettings, JobStatus,
};
use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

use super::responses::{ArtifactEntry, JobResponse};

pub(super) fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    Uuid::parse_str(raw)
        .map(JobId::from_uuid)
        .map_err(|_| ApiError::InvalidInput(format!("invalid job id: {raw}")))
}

pub(super) async fn load_job(state: &AppState, id: JobId) -> Result<Job, ApiError> {
    state
        .jobs
        .get_job(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job not found: {id}")))
}

/// Fields shared by the create and create-draft uploads.
#[derive(Default)]
pub(super) struct JobUpload {
    pub client_id: String,
    pub document_id: String,
    pub document_name: String,
    pub task_name: String,
    pub engine: Option<EngineKind>,
    pub text_model: String,
    pub table_model: String,
    pub image_model: String,
    pub stamp_model: String,
    pub node_id: Option<String>,
    pub pdf: Option<Bytes>,
    pub blocks: Option<Bytes>,
}

impl JobUpload {
    pub(super) fn settings(&self) -> JobSettings {
        JobSettings::models(
            &self.text_model,
            &self.table_model,
            &self.image_model,
            &self.stamp_model,
        )
    }
}

pub(super) async fn read_job_upload(mut multipart: Multipart) -> Result<JobUpload, ApiError> {
    let mut upload = JobUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("multipart: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "pdf" => {
                upload.pdf = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::InvalidInput(format!("pdf upload: {e}")))?,
                );
            }
            "blocks_file" | "annotation_json" => {
                upload.blocks = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::InvalidInput(format!("blocks upload: {e}")))?,
                );
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::InvalidInput(format!("field {other}: {e}")))?;
                match other {
                    "client_id" => upload.client_id = value,
                    "document_id" => upload.document_id = value,
                    "document_name" => upload.document_name = value,
                    "task_name" => upload.task_name = value,
                    "engine" => {
                        upload.engine = Some(EngineKind::from_str(&value).map_err(|e| {
                            ApiError::InvalidInput(e)
                        })?);
                    }
                    "text_model" => upload.text_model = value,
                    "table_model" => upload.table_model = value,
                    "image_model" => upload.image_model = value,
                    "stamp_model" => upload.stamp_model = value,
                    "node_id" => {
                        if !value.is_empty() {
                            upload.node_id = Some(value);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if upload.client_id.is_empty() {
        return Err(ApiError::InvalidInput("client_id is required".to_string()));
    }
    if upload.document_id.is_empty() {
        return Err(ApiError::InvalidInput("document_id is required".to_string()));
    }
    if upload.document_name.is_empty() {
        return Err(ApiError::InvalidInput(
            "document_name is required".to_string(),
        ));
    }

    Ok(upload)
}

pub(super) fn parse_uploaded_blocks(raw: &[u8]) -> Result<Vec<Block>, ApiError> {
    if let Ok(blocks) = serde_json::from_slice::<Vec<Block>>(raw) {
        return Ok(blocks);
    }
    let annotation: AnnotationDocument = serde_json::from_slice(raw)
        .map_err(|e| ApiError::InvalidInput(format!("unparseable blocks payload: {e}")))?;
    Ok(annotation
        .pages
        .into_iter()
        .flat_map(|p| p.blocks.into_iter().map(|b| b.block))
        .collect())
}

/// Upload source files under the job's prefix and register them as job files.
/// The job row is rolled back when storage rejects the write.
pub(super) async fn stage_job_inputs(
    state: &AppState,
    job: &Job,
    pdf: Bytes,
    blocks: Bytes,
    blocks_file_name: &str,
) -> Result<(), ApiError> {
    let prefix = job.artifact_prefix.trim_end_matches('/');
    let pdf_key = format!("{prefix}/document.pdf");
    let blocks_key = format!("{prefix}/{blocks_file_name}");

    let pdf_len = pdf.len() as u64;
    let blocks_len = blocks.len() as u64;

    let uploads = async {
        state.artifacts.upload(&pdf_key, pdf).await?;
        state.artifacts.upload(&blocks_key, blocks).await?;
        Ok::<(), crate::application::ports::ArtifactStoreError>(())
    };

    if let Err(e) = uploads.await {
        tracing::error!(job_id = %job.id, error = %e, "Staging uploads failed, rolling job back");
        let _ = state.jobs.delete_job(job.id).await;
        return Err(ApiError::StorageUnavailable(e.to_string()));
    }

    state
        .jobs
        .append_job_file(&JobFile::new(
            job.id,
            JobFileType::Pdf,
            &pdf_key,
            "document.pdf",
            pdf_len,
        ))
        .await?;
    state
        .jobs
        .append_job_file(&JobFile::new(
            job.id,
            JobFileType::Blocks,
            &blocks_key,
            blocks_file_name,
            blocks_len,
        ))
        .await?;

    Ok(())
}

#[tracing::instrument(skip_all)]
pub async fn create_job_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<JobResponse>, ApiError> {
    state.admission.admit().await?;

    let upload = read_job_upload(multipart).await?;
    let pdf = upload
        .pdf
        .clone()
        .ok_or_else(|| ApiError::InvalidInput("pdf file is required".to_string()))?;
    let blocks_raw = upload
        .blocks
        .clone()
        .ok_or_else(|| ApiError::InvalidInput("blocks_file is required".to_string()))?;
    let blocks = parse_uploaded_blocks(&blocks_raw)?;

    let engine = upload.engine.unwrap_or(state.settings.default_engine);
    let job = Job::new(
        upload.client_id.clone(),
        upload.document_id.clone(),
        upload.document_name.clone(),
        upload.task_name.clone(),
        engine,
        JobStatus::Queued,
        upload.node_id.clone(),
    );

    state.jobs.insert_job(&job).await?;
    state.jobs.upsert_settings(job.id, &upload.settings()).await?;
    stage_job_inputs(&state, &job, pdf, blocks_raw, "blocks.json").await?;

    state.broker.publish(job.id).await?;

    tracing::info!(
        job_id = %job.id,
        client_id = %job.client_id,
        blocks = blocks.len(),
        engine = %engine,
        "OCR job enqueued"
    );

    Ok(Json(JobResponse::from(&job)))
}

#[derive(Deserialize)]
pub struct ListJobsQuery {
    pub client_id: Option<String>,
    pub document_id: Option<String>,
}

pub async fn list_jobs_handler(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let client_id = query.client_id.as_deref().filter(|s| !s.is_empty());
    let document_id = query.document_id.as_deref().filter(|s| !s.is_empty());
    let jobs = state.jobs.list_jobs(client_id, document_id).await?;
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

#[derive(Deserialize)]
pub struct ChangesQuery {
    pub since: String,
}

pub async fn jobs_changes_handler(
    State(state): State<AppState>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<Vec<JobResponse>>, ApiError> {
    let since: DateTime<Utc> = DateTime::parse_from_rfc3339(&query.since)
        .map_err(|_| ApiError::InvalidInput(format!("invalid since timestamp: {}", query.since)))?
        .with_timezone(&Utc);
    let jobs = state.jobs.list_changed_since(since).await?;
    Ok(Json(jobs.iter().map(JobResponse::from).collect()))
}

pub async fn get_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = load_job(&state, parse_job_id(&job_id)?).await?;
    Ok(Json(JobResponse::from(&job)))
}

#[derive(Serialize)]
pub struct BlockStats {
    pub total: usize,
    pub text: usize,
    pub table: usize,
    pub image: usize,
    pub grouped: usize,
}

#[derive(Serialize)]
pub struct SettingsResponse {
    pub text_model: String,
    pub table_model: String,
    pub image_model: String,
    pub stamp_model: String,
    pub is_correction_mode: bool,
}

#[derive(Serialize)]
pub struct JobDetailsResponse {
    #[serde(flatten)]
    pub job: JobResponse,
    pub settings: Option<SettingsResponse>,
    pub block_stats: Option<BlockStats>,
    pub artifacts: Vec<ArtifactEntry>,
}

pub async fn job_details_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobDetailsResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = load_job(&state, id).await?;

    let settings = state.jobs.get_settings(id).await?.map(|s| SettingsResponse {
        text_model: s.text_model,
        table_model: s.table_model,
        image_model: s.image_model,
        stamp_model: s.stamp_model,
        is_correction_mode: s.is_correction_mode,
    });

    let files = state.jobs.list_job_files(id).await?;
    let artifacts: Vec<ArtifactEntry> = files.iter().map(ArtifactEntry::from).collect();

    let block_stats = match state.jobs.get_job_file(id, JobFileType::Blocks).await? {
        Some(blocks_file) => match state.artifacts.download(&blocks_file.object_key).await {
            Ok(raw) => parse_uploaded_blocks(&raw).ok().map(|blocks| BlockStats {
                total: blocks.len(),
                text: blocks.iter().filter(|b| b.block_type == BlockType::Text).count(),
                table: blocks.iter().filter(|b| b.block_type == BlockType::Table).count(),
                image: blocks.iter().filter(|b| b.block_type == BlockType::Image).count(),
                grouped: blocks.iter().filter(|b| b.group_id.is_some()).count(),
            }),
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Block stats unavailable");
                None
            }
        },
        None => None,
    };

    Ok(Json(JobDetailsResponse {
        job: JobResponse::from(&job),
        settings,
        block_stats,
        artifacts,
    }))
}

#[derive(Serialize)]
pub struct ResultUrlResponse {
    pub download_url: String,
    pub file_name: String,
}

pub async fn job_result_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ResultUrlResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = load_job(&state, id).await?;

    if job.status != JobStatus::Done {
        return Err(ApiError::NotReady(format!(
            "job is {}, result not ready",
            job.status
        )));
    }

    let file = state
        .jobs
        .get_job_file(id, JobFileType::ResultZip)
        .await?
        .ok_or_else(|| ApiError::NotFound("result.zip not registered".to_string()))?;

    let download_url = state
        .artifacts
        .presign_get(
            &file.object_key,
            Duration::from_secs(state.settings.presign_expiry_s),
        )
        .await?;

    Ok(Json(ResultUrlResponse {
        download_url,
        file_name: file.file_name,
    }))
}

#[derive(Deserialize)]
pub struct PatchJobForm {
    pub task_name: String,
}

pub async fn patch_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Form(form): Form<PatchJobForm>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    if !state.jobs.update_task_name(id, &form.task_name).await? {
        return Err(ApiError::NotFound(format!("job not found: {job_id}")));
    }
    let job = load_job(&state, id).await?;
    Ok(Json(JobResponse::from(&job)))
}
