use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Block;

/// Current canonical serialization version of `annotation.json`.
pub const ANNOTATION_VERSION: u32 = 2;

/// A block together with its OCR result as it appears in the published
/// annotation. Failed blocks keep a null text and an explicit status marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedBlock {
    #[serde(flatten)]
    pub block: Block,
    #[serde(default)]
    pub ocr_text: Option<String>,
    #[serde(default)]
    pub ocr_status: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "remote_ocr".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationPage {
    pub page_number: u32,
    pub width: f64,
    pub height: f64,
    pub blocks: Vec<AnnotatedBlock>,
}

/// Canonical serialized document, version 2. Round-trips exactly through
/// serde_json: block sets, ids and normalized coordinates are preserved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationDocument {
    pub version: u32,
    pub pdf_path: String,
    pub pages: Vec<AnnotationPage>,
    pub created_at: DateTime<Utc>,
}

impl AnnotationDocument {
    pub fn new(pdf_path: impl Into<String>, pages: Vec<AnnotationPage>) -> Self {
        Self {
            version: ANNOTATION_VERSION,
            pdf_path: pdf_path.into(),
            pages,
            created_at: Utc::now(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn block_count(&self) -> usize {
        self.pages.iter().map(|p| p.blocks.len()).sum()
    }
}
