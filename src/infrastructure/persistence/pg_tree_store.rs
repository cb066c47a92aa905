use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::application::ports::{TreeStore, TreeStoreError};
use crate::domain::{NodeFile, TreeNode};

pub struct PgTreeStore {
    pool: PgPool,
}

impl PgTreeStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &PgPool) -> Result<(), TreeStoreError> {
        // node_files carries no FK to jobs: job deletion must not cascade here.
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS tree_nodes (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id TEXT,
            created_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS node_files (
            node_id TEXT NOT NULL,
            file_type TEXT NOT NULL,
            object_key TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (node_id, object_key)
        );
        "#;
        for statement in ddl.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }
}

fn row_to_node(row: &sqlx::postgres::PgRow) -> Result<TreeNode, TreeStoreError> {
    let get = |e: sqlx::Error| TreeStoreError::QueryFailed(e.to_string());
    Ok(TreeNode {
        id: row.try_get("id").map_err(get)?,
        name: row.try_get("name").map_err(get)?,
        parent_id: row.try_get("parent_id").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
    })
}

#[async_trait]
impl TreeStore for PgTreeStore {
    async fn create_node(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<TreeNode, TreeStoreError> {
        let node = TreeNode {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(|s| s.to_string()),
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO tree_nodes (id, name, parent_id, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(&node.id)
        .bind(&node.name)
        .bind(&node.parent_id)
        .bind(node.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        Ok(node)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<TreeNode>, TreeStoreError> {
        let row = sqlx::query("SELECT id, name, parent_id, created_at FROM tree_nodes WHERE id = $1")
            .bind(node_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        row.map(|r| row_to_node(&r)).transpose()
    }

    async fn list_nodes(&self, parent_id: Option<&str>) -> Result<Vec<TreeNode>, TreeStoreError> {
        let rows = sqlx::query(
            "SELECT id, name, parent_id, created_at FROM tree_nodes \
             WHERE parent_id IS NOT DISTINCT FROM $1 ORDER BY created_at ASC",
        )
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(row_to_node).collect()
    }

    async fn delete_node(&self, node_id: &str) -> Result<bool, TreeStoreError> {
        sqlx::query("DELETE FROM node_files WHERE node_id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        let result = sqlx::query("DELETE FROM tree_nodes WHERE id = $1")
            .bind(node_id)
            .execute(&self.pool)
            .await
            .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn register_node_file(&self, file: &NodeFile) -> Result<(), TreeStoreError> {
        sqlx::query(
            "INSERT INTO node_files (node_id, file_type, object_key, file_name, file_size) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (node_id, object_key) DO UPDATE SET \
               file_type = EXCLUDED.file_type, \
               file_name = EXCLUDED.file_name, \
               file_size = EXCLUDED.file_size",
        )
        .bind(&file.node_id)
        .bind(&file.file_type)
        .bind(&file.object_key)
        .bind(&file.file_name)
        .bind(file.size as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn list_node_files(&self, node_id: &str) -> Result<Vec<NodeFile>, TreeStoreError> {
        let rows = sqlx::query(
            "SELECT node_id, file_type, object_key, file_name, file_size \
             FROM node_files WHERE node_id = $1",
        )
        .bind(node_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| TreeStoreError::QueryFailed(e.to_string()))?;

        let get = |e: sqlx::Error| TreeStoreError::QueryFailed(e.to_string());
        rows.iter()
            .map(|r| {
                Ok(NodeFile {
                    node_id: r.try_get("node_id").map_err(get)?,
                    file_type: r.try_get("file_type").map_err(get)?,
                    object_key: r.try_get("object_key").map_err(get)?,
                    file_name: r.try_get("file_name").map_err(get)?,
                    size: r.try_get::<i64, _>("file_size").map_err(get)? as u64,
                })
            })
            .collect()
    }
}
