use chrono::{DateTime, Utc};

/// Hierarchical project node. Only the id and the node-file relation are
/// consumed by the OCR core; everything else belongs to the tree service.
#[derive(Debug, Clone)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// File registration at a tree node. Deliberately not owned by a job: job
/// deletion must never cascade here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFile {
    pub node_id: String,
    pub file_type: String,
    pub object_key: String,
    pub file_name: String,
    pub size: u64,
}
