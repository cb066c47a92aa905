use async_trait::async_trait;

use crate::domain::{NodeFile, TreeNode};

/// Node CRUD and node-file registration, passed through to the metadata
/// store. Node files have no foreign key to jobs: deleting a job never
/// removes them.
#[async_trait]
pub trait TreeStore: Send + Sync {
    async fn create_node(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<TreeNode, TreeStoreError>;

    async fn get_node(&self, node_id: &str) -> Result<Option<TreeNode>, TreeStoreError>;

    async fn list_nodes(&self, parent_id: Option<&str>) -> Result<Vec<TreeNode>, TreeStoreError>;

    async fn delete_node(&self, node_id: &str) -> Result<bool, TreeStoreError>;

    /// Idempotent upsert keyed by (node_id, object_key).
    async fn register_node_file(&self, file: &NodeFile) -> Result<(), TreeStoreError>;

    async fn list_node_files(&self, node_id: &str) -> Result<Vec<NodeFile>, TreeStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TreeStoreError {
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("node not found: {0}")]
    NotFound(String),
}
