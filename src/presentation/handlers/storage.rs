//! Storage proxy: scoped object-store operations for clients that must not
//! hold bucket credentials.

use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

pub async fn storage_exists_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let exists = state.artifacts.exists(&key).await?;
    Ok(Json(json!({"key": key, "exists": exists})))
}

pub async fn storage_upload_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.is_empty() {
        return Err(ApiError::InvalidInput("empty upload body".to_string()));
    }
    let size = body.len();
    state.artifacts.upload(&key, body).await?;
    Ok(Json(json!({"key": key, "size": size})))
}

#[derive(Deserialize)]
pub struct UploadTextRequest {
    pub key: String,
    pub text: String,
}

pub async fn storage_upload_text_handler(
    State(state): State<AppState>,
    Json(request): Json<UploadTextRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .artifacts
        .upload_text(&request.key, &request.text)
        .await?;
    Ok(Json(json!({"key": request.key, "size": request.text.len()})))
}

pub async fn storage_download_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let url = state
        .artifacts
        .presign_get(
            &key,
            Duration::from_secs(state.settings.presign_expiry_s),
        )
        .await?;
    Ok(Json(json!({"key": key, "download_url": url})))
}

pub async fn storage_delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.artifacts.delete(&key).await?;
    Ok(Json(json!({"key": key, "deleted": true})))
}

#[derive(Deserialize)]
pub struct DeleteBatchRequest {
    pub keys: Vec<String>,
}

pub async fn storage_delete_batch_handler(
    State(state): State<AppState>,
    Json(request): Json<DeleteBatchRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.artifacts.delete_batch(&request.keys).await?;
    Ok(Json(json!({"deleted": request.keys.len()})))
}

pub async fn storage_list_handler(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let keys = state.artifacts.list_by_prefix(&prefix).await?;
    Ok(Json(json!({"prefix": prefix, "keys": keys})))
}
