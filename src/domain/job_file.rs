use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use super::JobId;

/// Typed artifact reference owned by a job (cascade deleted with it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobFileType {
    Pdf,
    Blocks,
    Annotation,
    ResultMd,
    ResultZip,
    Crop,
    OcrHtml,
    ResultJson,
}

impl JobFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobFileType::Pdf => "pdf",
            JobFileType::Blocks => "blocks",
            JobFileType::Annotation => "annotation",
            JobFileType::ResultMd => "result_md",
            JobFileType::ResultZip => "result_zip",
            JobFileType::Crop => "crop",
            JobFileType::OcrHtml => "ocr_html",
            JobFileType::ResultJson => "result_json",
        }
    }

    /// For single-valued types a job holds at most one row; crops are the
    /// only multi-valued type.
    pub fn is_single_valued(&self) -> bool {
        !matches!(self, JobFileType::Crop)
    }

    /// Icon hint surfaced in the job details listing.
    pub fn icon(&self) -> &'static str {
        match self {
            JobFileType::Pdf => "📄",
            JobFileType::Blocks | JobFileType::Annotation | JobFileType::ResultJson => "🧩",
            JobFileType::ResultMd => "📝",
            JobFileType::ResultZip => "📦",
            JobFileType::Crop => "🖼",
            JobFileType::OcrHtml => "🌐",
        }
    }
}

impl FromStr for JobFileType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pdf" => Ok(JobFileType::Pdf),
            "blocks" => Ok(JobFileType::Blocks),
            "annotation" => Ok(JobFileType::Annotation),
            "result_md" => Ok(JobFileType::ResultMd),
            "result_zip" => Ok(JobFileType::ResultZip),
            "crop" => Ok(JobFileType::Crop),
            "ocr_html" => Ok(JobFileType::OcrHtml),
            "result_json" => Ok(JobFileType::ResultJson),
            other => Err(format!("Invalid job file type: {}", other)),
        }
    }
}

impl fmt::Display for JobFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct JobFile {
    pub id: Uuid,
    pub job_id: JobId,
    pub file_type: JobFileType,
    pub object_key: String,
    pub file_name: String,
    pub size: u64,
    /// For crops: block id, page index, normalized coords, block type.
    pub metadata: Option<serde_json::Value>,
}

impl JobFile {
    pub fn new(
        job_id: JobId,
        file_type: JobFileType,
        object_key: impl Into<String>,
        file_name: impl Into<String>,
        size: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            file_type,
            object_key: object_key.into(),
            file_name: file_name.into(),
            size,
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}
