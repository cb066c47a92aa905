use std::fmt;

/// Final outcome of one requested block. The terminal invariant is that every
/// requested block has exactly one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrOutcome {
    Ok,
    Missing,
    RetriedOk,
    Failed,
}

impl OcrOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrOutcome::Ok => "ok",
            OcrOutcome::Missing => "missing",
            OcrOutcome::RetriedOk => "retried-ok",
            OcrOutcome::Failed => "failed",
        }
    }

    /// Blocks in these states are picked up by the verification pass.
    pub fn needs_retry(&self) -> bool {
        matches!(self, OcrOutcome::Missing | OcrOutcome::Failed)
    }
}

impl fmt::Display for OcrOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recognized block. Lives only inside a worker execution; the durable
/// form is the annotation artifact.
#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub block_id: String,
    pub text: Option<String>,
    pub status: OcrOutcome,
    pub failure_reason: Option<String>,
}

impl ResultRecord {
    pub fn missing(block_id: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            text: None,
            status: OcrOutcome::Missing,
            failure_reason: None,
        }
    }

    pub fn ok(block_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            text: Some(text.into()),
            status: OcrOutcome::Ok,
            failure_reason: None,
        }
    }

    pub fn failed(block_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            block_id: block_id.into(),
            text: None,
            status: OcrOutcome::Failed,
            failure_reason: Some(reason.into()),
        }
    }
}
