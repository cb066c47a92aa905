use std::str::FromStr;

use axum::extract::{Multipart, Path, State};
use axum::{Form, Json};
use serde::Deserialize;

use crate::domain::{EngineKind, Job, JobEvent, JobSettings, JobStatus};
use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

use super::jobs::{
    load_job, parse_job_id, parse_uploaded_blocks, read_job_upload, stage_job_inputs,
};
use super::responses::JobResponse;

/// Like create_job, but the job stays a draft: nothing is published and the
/// blocks payload is a full annotation document.
#[tracing::instrument(skip_all)]
pub async fn create_draft_handler(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<JobResponse>, ApiError> {
    let upload = read_job_upload(multipart).await?;
    let pdf = upload
        .pdf
        .clone()
        .ok_or_else(|| ApiError::InvalidInput("pdf file is required".to_string()))?;
    let blocks_raw = upload
        .blocks
        .clone()
        .ok_or_else(|| ApiError::InvalidInput("annotation_json is required".to_string()))?;
    parse_uploaded_blocks(&blocks_raw)?;

    let engine = upload.engine.unwrap_or(state.settings.default_engine);
    let job = Job::new(
        upload.client_id.clone(),
        upload.document_id.clone(),
        upload.document_name.clone(),
        upload.task_name.clone(),
        engine,
        JobStatus::Draft,
        upload.node_id.clone(),
    );

    state.jobs.insert_job(&job).await?;
    state.jobs.upsert_settings(job.id, &upload.settings()).await?;
    stage_job_inputs(&state, &job, pdf, blocks_raw, "annotation.json").await?;

    tracing::info!(job_id = %job.id, client_id = %job.client_id, "Draft created");

    Ok(Json(JobResponse::from(&job)))
}

#[derive(Deserialize)]
pub struct StartDraftForm {
    pub engine: Option<String>,
    #[serde(default)]
    pub text_model: String,
    #[serde(default)]
    pub table_model: String,
    #[serde(default)]
    pub image_model: String,
    #[serde(default)]
    pub stamp_model: String,
}

pub async fn start_draft_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Form(form): Form<StartDraftForm>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = load_job(&state, id).await?;

    let next = job
        .status
        .apply(JobEvent::StartDraft)?
        .unwrap_or(JobStatus::Queued);

    let engine = match &form.engine {
        Some(raw) if !raw.is_empty() => {
            EngineKind::from_str(raw).map_err(ApiError::InvalidInput)?
        }
        _ => job.engine,
    };

    state.admission.admit().await?;

    // Engine and settings land while the job is still a draft, so a worker
    // claiming right after the swap sees the final configuration.
    state.jobs.set_engine(id, engine).await?;
    state
        .jobs
        .upsert_settings(
            id,
            &JobSettings::models(
                &form.text_model,
                &form.table_model,
                &form.image_model,
                &form.stamp_model,
            ),
        )
        .await?;

    if !state
        .jobs
        .compare_and_set_status(id, &[JobStatus::Draft], next, false)
        .await?
    {
        return Err(ApiError::InvalidTransition(format!(
            "job {job_id} is no longer a draft"
        )));
    }

    state.broker.publish(id).await?;

    tracing::info!(job_id = %id, engine = %engine, "Draft started");

    let job = load_job(&state, id).await?;
    Ok(Json(JobResponse::from(&job)))
}
