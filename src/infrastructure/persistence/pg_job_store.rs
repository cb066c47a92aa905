use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use crate::application::ports::{JobStore, JobStoreError, JobStatusUpdate};
use crate::domain::{
    EngineKind, Job, JobFile, JobFileType, JobId, JobSettings, JobStatus,
};

pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open the connection pool, riding out a database that is still coming
    /// up. Backoff doubles per attempt (capped at ~16s); once
    /// `connect_retries` is exhausted the store counts as unreachable and
    /// the caller takes the infrastructure exit path.
    pub async fn connect(
        url: &str,
        max_connections: u32,
        connect_retries: u32,
    ) -> Result<PgPool, JobStoreError> {
        let mut attempt: u32 = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(max_connections)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
            {
                Ok(pool) => {
                    tracing::info!(max_connections, "Metadata store pool ready");
                    return Ok(pool);
                }
                Err(e) if attempt < connect_retries => {
                    attempt += 1;
                    let backoff = Duration::from_millis(250u64 << attempt.min(6));
                    tracing::warn!(
                        error = %e,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "Metadata store not reachable yet"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(JobStoreError::ConnectionFailed(e.to_string())),
            }
        }
    }

    /// Idempotent schema bootstrap. Jobs cascade to files and settings; node
    /// files live in their own table with no FK to jobs.
    pub async fn migrate(pool: &PgPool) -> Result<(), JobStoreError> {
        let ddl = r#"
        CREATE TABLE IF NOT EXISTS jobs (
            id UUID PRIMARY KEY,
            client_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            document_name TEXT NOT NULL,
            task_name TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL,
            progress REAL NOT NULL DEFAULT 0,
            engine TEXT NOT NULL,
            artifact_prefix TEXT NOT NULL,
            error_message TEXT,
            status_message TEXT,
            node_id TEXT,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        );
        CREATE TABLE IF NOT EXISTS job_files (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
            file_type TEXT NOT NULL,
            object_key TEXT NOT NULL,
            file_name TEXT NOT NULL,
            file_size BIGINT NOT NULL DEFAULT 0,
            metadata TEXT
        );
        CREATE TABLE IF NOT EXISTS job_settings (
            job_id UUID PRIMARY KEY REFERENCES jobs(id) ON DELETE CASCADE,
            text_model TEXT NOT NULL DEFAULT '',
            table_model TEXT NOT NULL DEFAULT '',
            image_model TEXT NOT NULL DEFAULT '',
            stamp_model TEXT NOT NULL DEFAULT '',
            is_correction_mode BOOLEAN NOT NULL DEFAULT FALSE
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status);
        CREATE INDEX IF NOT EXISTS idx_jobs_updated_at ON jobs(updated_at);
        CREATE INDEX IF NOT EXISTS idx_job_files_job_id ON job_files(job_id);
        "#;
        for statement in ddl.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(pool)
                .await
                .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }
}

fn row_to_job(row: &PgRow) -> Result<Job, JobStoreError> {
    let status_raw: String = row
        .try_get("status")
        .map_err(|e| JobStoreError::CorruptRow(e.to_string()))?;
    let engine_raw: String = row
        .try_get("engine")
        .map_err(|e| JobStoreError::CorruptRow(e.to_string()))?;
    let status = JobStatus::from_str(&status_raw).map_err(JobStoreError::CorruptRow)?;
    let engine = EngineKind::from_str(&engine_raw).map_err(JobStoreError::CorruptRow)?;

    let get = |e: sqlx::Error| JobStoreError::CorruptRow(e.to_string());

    Ok(Job {
        id: JobId::from_uuid(row.try_get::<Uuid, _>("id").map_err(get)?),
        client_id: row.try_get("client_id").map_err(get)?,
        document_id: row.try_get("document_id").map_err(get)?,
        document_name: row.try_get("document_name").map_err(get)?,
        task_name: row.try_get("task_name").map_err(get)?,
        status,
        progress: row.try_get::<f32, _>("progress").map_err(get)?,
        engine,
        artifact_prefix: row.try_get("artifact_prefix").map_err(get)?,
        error_message: row.try_get("error_message").map_err(get)?,
        status_message: row.try_get("status_message").map_err(get)?,
        node_id: row.try_get("node_id").map_err(get)?,
        created_at: row.try_get("created_at").map_err(get)?,
        updated_at: row.try_get("updated_at").map_err(get)?,
    })
}

fn row_to_job_file(row: &PgRow) -> Result<JobFile, JobStoreError> {
    let get = |e: sqlx::Error| JobStoreError::CorruptRow(e.to_string());
    let file_type_raw: String = row.try_get("file_type").map_err(get)?;
    let metadata_raw: Option<String> = row.try_get("metadata").map_err(get)?;
    Ok(JobFile {
        id: row.try_get::<Uuid, _>("id").map_err(get)?,
        job_id: JobId::from_uuid(row.try_get::<Uuid, _>("job_id").map_err(get)?),
        file_type: JobFileType::from_str(&file_type_raw).map_err(JobStoreError::CorruptRow)?,
        object_key: row.try_get("object_key").map_err(get)?,
        file_name: row.try_get("file_name").map_err(get)?,
        size: row.try_get::<i64, _>("file_size").map_err(get)? as u64,
        metadata: metadata_raw.and_then(|raw| serde_json::from_str(&raw).ok()),
    })
}

const JOB_COLUMNS: &str = "id, client_id, document_id, document_name, task_name, status, \
    progress, engine, artifact_prefix, error_message, status_message, node_id, \
    created_at, updated_at";

#[async_trait]
impl JobStore for PgJobStore {
    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn insert_job(&self, job: &Job) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO jobs (id, client_id, document_id, document_name, task_name, status, \
             progress, engine, artifact_prefix, error_message, status_message, node_id, \
             created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(job.id.as_uuid())
        .bind(&job.client_id)
        .bind(&job.document_id)
        .bind(&job.document_name)
        .bind(&job.task_name)
        .bind(job.status.as_str())
        .bind(job.progress)
        .bind(job.engine.as_str())
        .bind(&job.artifact_prefix)
        .bind(&job.error_message)
        .bind(&job.status_message)
        .bind(&job.node_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn get_job(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn list_jobs(
        &self,
        client_id: Option<&str>,
        document_id: Option<&str>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs \
             WHERE ($1::TEXT IS NULL OR client_id = $1) \
               AND ($2::TEXT IS NULL OR document_id = $2) \
             ORDER BY created_at DESC"
        ))
        .bind(client_id)
        .bind(document_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(row_to_job).collect()
    }

    async fn list_changed_since(&self, since: DateTime<Utc>) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE updated_at > $1 ORDER BY updated_at DESC"
        ))
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self, update), fields(job_id = %id))]
    async fn update_job(&self, id: JobId, update: JobStatusUpdate) -> Result<(), JobStoreError> {
        sqlx::query(
            "UPDATE jobs SET \
               status = COALESCE($2, status), \
               progress = COALESCE($3, progress), \
               status_message = COALESCE($4, status_message), \
               error_message = COALESCE($5, error_message), \
               updated_at = $6 \
             WHERE id = $1",
        )
        .bind(id.as_uuid())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.progress)
        .bind(update.status_message)
        .bind(update.error_message)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn compare_and_set_status(
        &self,
        id: JobId,
        expected: &[JobStatus],
        next: JobStatus,
        reset_progress: bool,
    ) -> Result<bool, JobStoreError> {
        let expected: Vec<String> = expected.iter().map(|s| s.as_str().to_string()).collect();
        let result = sqlx::query(
            "UPDATE jobs SET \
               status = $2, \
               progress = CASE WHEN $3 THEN 0 ELSE progress END, \
               error_message = CASE WHEN $3 THEN NULL ELSE error_message END, \
               updated_at = $4 \
             WHERE id = $1 AND status = ANY($5)",
        )
        .bind(id.as_uuid())
        .bind(next.as_str())
        .bind(reset_progress)
        .bind(Utc::now())
        .bind(&expected)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_task_name(&self, id: JobId, task_name: &str) -> Result<bool, JobStoreError> {
        let result = sqlx::query("UPDATE jobs SET task_name = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(task_name)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_engine(&self, id: JobId, engine: EngineKind) -> Result<(), JobStoreError> {
        sqlx::query("UPDATE jobs SET engine = $2, updated_at = $3 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(engine.as_str())
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn upsert_settings(
        &self,
        id: JobId,
        settings: &JobSettings,
    ) -> Result<(), JobStoreError> {
        sqlx::query(
            "INSERT INTO job_settings (job_id, text_model, table_model, image_model, \
             stamp_model, is_correction_mode) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (job_id) DO UPDATE SET \
               text_model = EXCLUDED.text_model, \
               table_model = EXCLUDED.table_model, \
               image_model = EXCLUDED.image_model, \
               stamp_model = EXCLUDED.stamp_model, \
               is_correction_mode = EXCLUDED.is_correction_mode",
        )
        .bind(id.as_uuid())
        .bind(&settings.text_model)
        .bind(&settings.table_model)
        .bind(&settings.image_model)
        .bind(&settings.stamp_model)
        .bind(settings.is_correction_mode)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn get_settings(&self, id: JobId) -> Result<Option<JobSettings>, JobStoreError> {
        let row = sqlx::query(
            "SELECT text_model, table_model, image_model, stamp_model, is_correction_mode \
             FROM job_settings WHERE job_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;

        let get = |e: sqlx::Error| JobStoreError::CorruptRow(e.to_string());
        row.map(|r| {
            Ok(JobSettings {
                text_model: r.try_get("text_model").map_err(get)?,
                table_model: r.try_get("table_model").map_err(get)?,
                image_model: r.try_get("image_model").map_err(get)?,
                stamp_model: r.try_get("stamp_model").map_err(get)?,
                is_correction_mode: r.try_get("is_correction_mode").map_err(get)?,
            })
        })
        .transpose()
    }

    async fn append_job_file(&self, file: &JobFile) -> Result<(), JobStoreError> {
        // Single-valued file types hold at most one row per job.
        if file.file_type.is_single_valued() {
            sqlx::query("DELETE FROM job_files WHERE job_id = $1 AND file_type = $2")
                .bind(file.job_id.as_uuid())
                .bind(file.file_type.as_str())
                .execute(&self.pool)
                .await
                .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        }
        let metadata = file
            .metadata
            .as_ref()
            .map(|m| m.to_string());
        sqlx::query(
            "INSERT INTO job_files (id, job_id, file_type, object_key, file_name, file_size, \
             metadata) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(file.id)
        .bind(file.job_id.as_uuid())
        .bind(file.file_type.as_str())
        .bind(&file.object_key)
        .bind(&file.file_name)
        .bind(file.size as i64)
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    async fn list_job_files(&self, id: JobId) -> Result<Vec<JobFile>, JobStoreError> {
        let rows = sqlx::query(
            "SELECT id, job_id, file_type, object_key, file_name, file_size, metadata \
             FROM job_files WHERE job_id = $1",
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        rows.iter().map(row_to_job_file).collect()
    }

    async fn get_job_file(
        &self,
        id: JobId,
        file_type: JobFileType,
    ) -> Result<Option<JobFile>, JobStoreError> {
        let row = sqlx::query(
            "SELECT id, job_id, file_type, object_key, file_name, file_size, metadata \
             FROM job_files WHERE job_id = $1 AND file_type = $2 LIMIT 1",
        )
        .bind(id.as_uuid())
        .bind(file_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        row.map(|r| row_to_job_file(&r)).transpose()
    }

    #[instrument(skip(self), fields(job_id = %id))]
    async fn delete_job(&self, id: JobId) -> Result<bool, JobStoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<u64, JobStoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        let count: i64 = row
            .try_get("n")
            .map_err(|e| JobStoreError::CorruptRow(e.to_string()))?;
        Ok(count as u64)
    }

    async fn claim_job(
        &self,
        id: JobId,
        max_concurrent: u32,
    ) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'processing', updated_at = $3 \
             WHERE id = ( \
               SELECT id FROM jobs \
               WHERE id = $1 AND status = 'queued' \
                 AND (SELECT COUNT(*) FROM jobs WHERE status = 'processing') < $2 \
               FOR UPDATE SKIP LOCKED \
             ) RETURNING {JOB_COLUMNS}"
        ))
        .bind(id.as_uuid())
        .bind(i64::from(max_concurrent))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        row.map(|r| row_to_job(&r)).transpose()
    }

    async fn claim_next_queued(&self, max_concurrent: u32) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!(
            "UPDATE jobs SET status = 'processing', updated_at = $2 \
             WHERE id = ( \
               SELECT id FROM jobs \
               WHERE status = 'queued' \
                 AND (SELECT COUNT(*) FROM jobs WHERE status = 'processing') < $1 \
               ORDER BY created_at ASC LIMIT 1 \
               FOR UPDATE SKIP LOCKED \
             ) RETURNING {JOB_COLUMNS}"
        ))
        .bind(i64::from(max_concurrent))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| JobStoreError::QueryFailed(e.to_string()))?;
        row.map(|r| row_to_job(&r)).transpose()
    }
}
