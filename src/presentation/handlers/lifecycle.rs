//! Pause / resume / restart / cancel transitions. The domain transition table
//! decides legality; the store applies it as a compare-and-set so concurrent
//! transitions lose cleanly instead of clobbering.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;

use crate::domain::{JobEvent, JobId, JobStatus};
use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

use super::jobs::{load_job, parse_job_id};
use super::responses::JobResponse;

async fn apply_transition(
    state: &AppState,
    id: JobId,
    event: JobEvent,
) -> Result<JobResponse, ApiError> {
    let job = load_job(state, id).await?;
    let from = job.status;

    match from.apply(event)? {
        Some(next) => {
            let reset = event == JobEvent::Restart;
            if !state
                .jobs
                .compare_and_set_status(id, &[from], next, reset)
                .await?
            {
                return Err(ApiError::InvalidTransition(format!(
                    "job {id} changed state concurrently"
                )));
            }
            if next == JobStatus::Queued {
                state.broker.publish(id).await?;
            }
            tracing::info!(job_id = %id, from = %from, to = %next, "Job transition");
            let job = load_job(state, id).await?;
            Ok(JobResponse::from(&job))
        }
        None => {
            // Cancel: artifacts go first, then the row (cascading to job
            // files and settings; node files survive by design).
            let prefix = job.artifact_prefix.trim_end_matches('/');
            match state.artifacts.list_by_prefix(prefix).await {
                Ok(keys) if !keys.is_empty() => {
                    if let Err(e) = state.artifacts.delete_batch(&keys).await {
                        tracing::warn!(job_id = %id, error = %e, "Artifact cleanup incomplete");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(job_id = %id, error = %e, "Artifact listing failed on cancel");
                }
            }
            state.jobs.delete_job(id).await?;
            tracing::info!(job_id = %id, from = %from, "Job cancelled and removed");
            Ok(JobResponse::from(&job))
        }
    }
}

pub async fn pause_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(apply_transition(&state, id, JobEvent::Pause).await?))
}

pub async fn resume_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(apply_transition(&state, id, JobEvent::Resume).await?))
}

pub async fn restart_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(apply_transition(&state, id, JobEvent::Restart).await?))
}

pub async fn delete_job_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = parse_job_id(&job_id)?;
    apply_transition(&state, id, JobEvent::Cancel).await?;
    Ok(Json(json!({"deleted": true})))
}
