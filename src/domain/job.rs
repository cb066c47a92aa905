use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::JobStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which vision provider family a job is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    /// API-keyed vision provider (chat-completions style, base64 image).
    VisionApi,
    /// Segmentation+OCR provider (submit PDF, poll, fetch markdown).
    Segmentation,
    /// Local echo backend; no network, used for dry runs and tests.
    Echo,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::VisionApi => "vision_api",
            EngineKind::Segmentation => "segmentation",
            EngineKind::Echo => "echo",
        }
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vision_api" => Ok(EngineKind::VisionApi),
            "segmentation" => Ok(EngineKind::Segmentation),
            "echo" => Ok(EngineKind::Echo),
            other => Err(format!("Unknown engine: {}", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of OCR work over one PDF document.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub client_id: String,
    /// Content hash of the source document.
    pub document_id: String,
    pub document_name: String,
    pub task_name: String,
    pub status: JobStatus,
    pub progress: f32,
    pub engine: EngineKind,
    /// Object-store path root for all of this job's artifacts.
    pub artifact_prefix: String,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client_id: String,
        document_id: String,
        document_name: String,
        task_name: String,
        engine: EngineKind,
        status: JobStatus,
        node_id: Option<String>,
    ) -> Self {
        let id = JobId::new();
        let now = Utc::now();
        Self {
            id,
            client_id,
            document_id,
            document_name,
            task_name,
            status,
            progress: 0.0,
            engine,
            artifact_prefix: format!("ocr_jobs/{}", id),
            error_message: None,
            status_message: None,
            node_id,
            created_at: now,
            updated_at: now,
        }
    }
}
