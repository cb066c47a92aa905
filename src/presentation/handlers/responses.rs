use serde::Serialize;

use crate::domain::{Job, JobFile, TreeNode};

#[derive(Serialize)]
pub struct JobResponse {
    pub id: String,
    pub client_id: String,
    pub document_id: String,
    pub document_name: String,
    pub task_name: String,
    pub status: String,
    pub progress: f32,
    pub engine: String,
    pub artifact_prefix: String,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub node_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&Job> for JobResponse {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            client_id: job.client_id.clone(),
            document_id: job.document_id.clone(),
            document_name: job.document_name.clone(),
            task_name: job.task_name.clone(),
            status: job.status.as_str().to_string(),
            progress: job.progress,
            engine: job.engine.as_str().to_string(),
            artifact_prefix: job.artifact_prefix.clone(),
            error_message: job.error_message.clone(),
            status_message: job.status_message.clone(),
            node_id: job.node_id.clone(),
            created_at: job.created_at.to_rfc3339(),
            updated_at: job.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
pub struct ArtifactEntry {
    pub file_type: String,
    pub file_name: String,
    pub object_key: String,
    pub size: u64,
    pub icon: String,
}

impl From<&JobFile> for ArtifactEntry {
    fn from(file: &JobFile) -> Self {
        Self {
            file_type: file.file_type.as_str().to_string(),
            file_name: file.file_name.clone(),
            object_key: file.object_key.clone(),
            size: file.size,
            icon: file.file_type.icon().to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct NodeResponse {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: String,
}

impl From<&TreeNode> for NodeResponse {
    fn from(node: &TreeNode) -> Self {
        Self {
            id: node.id.clone(),
            name: node.name.clone(),
            parent_id: node.parent_id.clone(),
            created_at: node.created_at.to_rfc3339(),
        }
    }
}
