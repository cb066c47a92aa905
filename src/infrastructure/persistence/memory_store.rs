//! In-memory metadata store used by the test suites and single-process dry
//! runs. Mirrors the Postgres adapter's semantics, including cascade rules
//! and claim atomicity (one lock guards every mutation).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::application::ports::{
    JobStore, JobStoreError, JobStatusUpdate, TreeStore, TreeStoreError,
};
use crate::domain::{
    EngineKind, Job, JobFile, JobFileType, JobId, JobSettings, JobStatus, NodeFile, TreeNode,
};

#[derive(Default)]
struct State {
    jobs: HashMap<JobId, Job>,
    files: Vec<JobFile>,
    settings: HashMap<JobId, JobSettings>,
    nodes: HashMap<String, TreeNode>,
    node_files: Vec<NodeFile>,
}

#[derive(Default)]
pub struct MemoryMetadataStore {
    state: Mutex<State>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryMetadataStore {
    async fn insert_job(&self, job: &Job) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        state.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        client_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| client_id.map(|c| j.client_id == c).unwrap_or(true))
            .filter(|j| document_id.map(|d| j.document_id == d).unwrap_or(true))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }

    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let state = self.state.lock().await;
        let mut jobs: Vec<Job> = state
            .jobs
            .values()
            .filter(|j| j.updated_at > since)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(jobs)
    }

    async fn update_job(&self, id: JobId, update: JobStatusUpdate) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            if let Some(status) = update.status {
                job.status = status;
            }
            if let Some(progress) = update.progress {
                job.progress = progress.clamp(0.0, 1.0);
            }
            if let Some(message) = update.status_message {
                job.status_message = Some(message);
            }
            if let Some(error) = update.error_message {
                job.error_message = Some(error);
            }
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: JobId,
        expected: &[JobStatus],
        next: JobStatus,
        reset_progress: bool,
    ) -> Result<bool, JobStoreError> {
        let mut state = self.state.lock().await;
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(false);
        };
        if !expected.contains(&job.status) {
            return Ok(false);
        }
        job.status = next;
        if reset_progress {
            job.progress = 0.0;
            job.error_message = None;
        }
        job.updated_at = Utc::now();
        Ok(true)
    }

    async fn update_task_name(&self, id: JobId, task_name: &str) -> Result<bool, JobStoreError> {
        let mut state = self.state.lock().await;
        match state.jobs.get_mut(&id) {
            Some(job) => {
                job.task_name = task_name.to_string();
                job.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_engine(&self, id: JobId, engine: EngineKind) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if let Some(job) = state.jobs.get_mut(&id) {
            job.engine = engine;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn upsert_settings(
        &self,
        id: JobId,
        settings: &JobSettings,
    ) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        state.settings.insert(id, settings.clone());
        Ok(())
    }

    async fn get_settings(&self, id: JobId) -> Result<Option<JobSettings>, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state.settings.get(&id).cloned())
    }

    async fn append_job_file(&self, file: &JobFile) -> Result<(), JobStoreError> {
        let mut state = self.state.lock().await;
        if file.file_type.is_single_valued() {
            state
                .files
                .retain(|f| !(f.job_id == file.job_id && f.file_type == file.file_type));
        }
        state.files.push(file.clone());
        Ok(())
    }

    async fn list_job_files(&self, id: JobId) -> Result<Vec<JobFile>, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .filter(|f| f.job_id == id)
            .cloned()
            .collect())
    }

    async fn get_job_file(
        &self,
        id: JobId,
        file_type: JobFileType,
    ) -> Result<Option<JobFile>, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state
            .files
            .iter()
            .find(|f| f.job_id == id && f.file_type == file_type)
            .cloned())
    }

    async fn delete_job(&self, id: JobId) -> Result<bool, JobStoreError> {
        let mut state = self.state.lock().await;
        let existed = state.jobs.remove(&id).is_some();
        // Cascade to job files and settings; node files stay put.
        state.files.retain(|f| f.job_id != id);
        state.settings.remove(&id);
        Ok(existed)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError> {
        let state = self.state.lock().await;
        Ok(state.jobs.values().filter(|j| j.status == status).count() as u64)
    }

    async fn claim_job(
        &self,
        id: JobId,
        max_concurrent: u32,
    ) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.state.lock().await;
        let processing = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count() as u32;
        if processing >= max_concurrent {
            return Ok(None);
        }
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        if job.status != JobStatus::Queued {
            return Ok(None);
        }
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn claim_next_queued(&self, max_concurrent: u32) -> Result<Option<Job>, JobStoreError> {
        let mut state = self.state.lock().await;
        let processing = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing)
            .count() as u32;
        if processing >= max_concurrent {
            return Ok(None);
        }
        let oldest = state
            .jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);
        let Some(id) = oldest else {
            return Ok(None);
        };
        let Some(job) = state.jobs.get_mut(&id) else {
            return Ok(None);
        };
        job.status = JobStatus::Processing;
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }
}

#[async_trait]
impl TreeStore for MemoryMetadataStore {
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
        let mut state = self.state.lock().await;
        state.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    async fn get_node(&self, node_id: &str) -> Result<Option<TreeNode>, TreeStoreError> {
        let state = self.state.lock().await;
        Ok(state.nodes.get(node_id).cloned())
    }

    async fn list_nodes(&self, parent_id: Option<&str>) -> Result<Vec<TreeNode>, TreeStoreError> {
        let state = self.state.lock().await;
        let mut nodes: Vec<TreeNode> = state
            .nodes
            .values()
            .filter(|n| n.parent_id.as_deref() == parent_id)
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(nodes)
    }

    async fn delete_node(&self, node_id: &str) -> Result<bool, TreeStoreError> {
        let mut state = self.state.lock().await;
        let existed = state.nodes.remove(node_id).is_some();
        state.node_files.retain(|f| f.node_id != node_id);
        Ok(existed)
    }

    async fn register_node_file(&self, file: &NodeFile) -> Result<(), TreeStoreError> {
        let mut state = self.state.lock().await;
        // Upsert keyed by (node_id, object_key).
        state
            .node_files
            .retain(|f| !(f.node_id == file.node_id && f.object_key == file.object_key));
        state.node_files.push(file.clone());
        Ok(())
    }

    async fn list_node_files(&self, node_id: &str) -> Result<Vec<NodeFile>, TreeStoreError> {
        let state = self.state.lock().await;
        Ok(state
            .node_files
            .iter()
            .filter(|f| f.node_id == node_id)
            .cloned()
            .collect())
    }
}
