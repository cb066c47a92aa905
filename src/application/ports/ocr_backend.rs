use async_trait::async_trait;

/// System + user message pair sent to a vision endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OcrPrompt {
    pub system: String,
    pub user: String,
}

impl OcrPrompt {
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
        }
    }

    /// JSON mode is switched on when the prompt itself asks for JSON output.
    pub fn wants_json(&self) -> bool {
        let probe = |s: &str| {
            let lower = s.to_lowercase();
            lower.contains("json")
        };
        probe(&self.system) || probe(&self.user)
    }
}

/// Capability contract for a vision endpoint. All recognition is outsourced;
/// the core never does OCR itself.
#[async_trait]
pub trait OcrBackend: Send + Sync {
    /// Recognize the contents of a PNG crop. `json_mode: None` means
    /// auto-detect from the prompt text.
    async fn recognize(
        &self,
        image_png: &[u8],
        prompt: &OcrPrompt,
        json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError>;

    fn name(&self) -> &'static str;
}

#[derive(Debug, thiserror::Error)]
pub enum OcrBackendError {
    #[error("rate limited after retries")]
    RateLimited,
    #[error("request failed: {0}")]
    RequestFailed(String),
    #[error("bad response: {0}")]
    BadResponse(String),
    #[error("timed out: {0}")]
    Timeout(String),
}

impl OcrBackendError {
    /// Transient failures are worth a broker-level retry; deterministic ones
    /// are terminal on first try.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OcrBackendError::RateLimited
                | OcrBackendError::RequestFailed(_)
                | OcrBackendError::Timeout(_)
        )
    }
}
