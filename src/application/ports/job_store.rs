use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EngineKind, Job, JobFile, JobFileType, JobId, JobSettings, JobStatus,
};

/// Partial status write. `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct JobStatusUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<f32>,
    pub status_message: Option<String>,
    pub error_message: Option<String>,
}

impl JobStatusUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_progress(mut self, progress: f32) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.status_message = Some(message.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

/// Durable metadata rows for jobs, job files and job settings. The metadata
/// store is the only authoritative shared state; all cross-worker
/// coordination (claims, status, node files) flows through it.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Newest first; both filters optional.
    async fn list_jobs(
        &self,
        client_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Jobs with `updated_at > since`, for incremental polling.
    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError>;

    async fn update_job(&self, id: JobId, update: JobStatusUpdate) -> Result<(), JobStoreError>;

    /// Compare-and-set the status: succeeds only when the current status is in
    /// `expected`. Returns whether the swap happened. When `reset_progress` is
    /// set, progress and error are zeroed (restart semantics).
    async fn compare_and_set_status(
        &self,
        id: JobId,
        expected: &[JobStatus],
        next: JobStatus,
        reset_progress: bool,
    ) -> Result<bool, JobStoreError>;

    async fn update_task_name(&self, id: JobId, task_name: &str) -> Result<bool, JobStoreError>;

    /// start_draft: store the chosen engine and move draft → queued.
    async fn set_engine(&self, id: JobId, engine: EngineKind) -> Result<(), JobStoreError>;

    async fn upsert_settings(
        &self,
        id: JobId,
        settings: &JobSettings,
    ) -> Result<(), JobStoreError>;

    async fn get_settings(&self, id: JobId) -> Result<Option<JobSettings>, JobStoreError>;

    async fn append_job_file(&self, file: &JobFile) -> Result<(), JobStoreError>;

    async fn list_job_files(&self, id: JobId) -> Result<Vec<JobFile>, JobStoreError>;

    async fn get_job_file(
        &self,
        id: JobId,
        file_type: JobFileType,
    ) -> Result<Option<JobFile>, JobStoreError>;

    /// Removes the job row and cascades to job files and settings. Node files
    /// registered on tree nodes are deliberately untouched.
    async fn delete_job(&self, id: JobId) -> Result<bool, JobStoreError>;

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError>;

    /// Atomically claim a specific queued job (queued → processing), provided
    /// fewer than `max_concurrent` jobs are currently processing. Returns the
    /// claimed job, or None when the job is gone, not queued, or capacity is
    /// exhausted.
    async fn claim_job(
        &self,
        id: JobId,
        max_concurrent: u32,
    ) -> Result<Option<Job>, JobStoreError>;

    /// Atomically claim the oldest queued job under the same capacity rule.
    async fn claim_next_queued(&self, max_concurrent: u32) -> Result<Option<Job>, JobStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("query failed: {0}")]
    QueryFailed(String),
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}
