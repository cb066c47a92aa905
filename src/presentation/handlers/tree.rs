//! Tree proxy: node CRUD and node-file registration, passed through to the
//! metadata store.

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::NodeFile;
use crate::presentation::error::ApiError;
use crate::presentation::state::AppState;

use super::responses::NodeResponse;

#[derive(Deserialize)]
pub struct CreateNodeRequest {
    pub name: String,
    pub parent_id: Option<String>,
}

pub async fn create_node_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateNodeRequest>,
) -> Result<Json<NodeResponse>, ApiError> {
    if request.name.is_empty() {
        return Err(ApiError::InvalidInput("node name is required".to_string()));
    }
    let node = state
        .tree
        .create_node(&request.name, request.parent_id.as_deref())
        .await?;
    Ok(Json(NodeResponse::from(&node)))
}

pub async fn get_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<NodeResponse>, ApiError> {
    let node = state
        .tree
        .get_node(&node_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("node not found: {node_id}")))?;
    Ok(Json(NodeResponse::from(&node)))
}

#[derive(Deserialize)]
pub struct ListNodesQuery {
    pub parent_id: Option<String>,
}

pub async fn list_nodes_handler(
    State(state): State<AppState>,
    Query(query): Query<ListNodesQuery>,
) -> Result<Json<Vec<NodeResponse>>, ApiError> {
    let nodes = state.tree.list_nodes(query.parent_id.as_deref()).await?;
    Ok(Json(nodes.iter().map(NodeResponse::from).collect()))
}

pub async fn delete_node_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state.tree.delete_node(&node_id).await?;
    if !deleted {
        return Err(ApiError::NotFound(format!("node not found: {node_id}")));
    }
    Ok(Json(json!({"deleted": true})))
}

#[derive(Deserialize)]
pub struct RegisterNodeFileRequest {
    pub file_type: String,
    pub object_key: String,
    pub file_name: String,
    #[serde(default)]
    pub size: u64,
}

pub async fn register_node_file_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
    Json(request): Json<RegisterNodeFileRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.tree.get_node(&node_id).await?.is_none() {
        return Err(ApiError::NotFound(format!("node not found: {node_id}")));
    }
    state
        .tree
        .register_node_file(&NodeFile {
            node_id: node_id.clone(),
            file_type: request.file_type,
            object_key: request.object_key,
            file_name: request.file_name,
            size: request.size,
        })
        .await?;
    Ok(Json(json!({"registered": true})))
}

#[derive(Serialize)]
pub struct NodeFileResponse {
    pub file_type: String,
    pub object_key: String,
    pub file_name: String,
    pub size: u64,
}

pub async fn list_node_files_handler(
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> Result<Json<Vec<NodeFileResponse>>, ApiError> {
    let files = state.tree.list_node_files(&node_id).await?;
    Ok(Json(
        files
            .into_iter()
            .map(|f| NodeFileResponse {
                file_type: f.file_type,
                object_key: f.object_key,
                file_name: f.file_name,
                size: f.size,
            })
            .collect(),
    ))
}
