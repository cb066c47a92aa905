//! Offline backend: echoes back a synthetic recognition for every block id it
//! finds in the prompt. Keeps the whole pipeline runnable without network
//! credentials, which is what the test suites and dry runs use.

use async_trait::async_trait;

use crate::application::ports::{OcrBackend, OcrBackendError, OcrPrompt};
use crate::domain::is_armor_format;

#[derive(Default)]
pub struct EchoBackend;

impl EchoBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OcrBackend for EchoBackend {
    async fn recognize(
        &self,
        _image_png: &[u8],
        prompt: &OcrPrompt,
        _json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError> {
        let mut seen = Vec::new();
        for token in prompt.user.split(|c: char| c.is_whitespace() || c == ',') {
            let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-');
            if token.contains('-') && is_armor_format(token) && !seen.iter().any(|s| s == token) {
                seen.push(token.to_string());
            }
        }

        if seen.is_empty() {
            return Ok("echoed text".to_string());
        }

        let sections: Vec<String> = seen
            .iter()
            .map(|id| format!("BLOCK: {id}\nrecognized text for {id}"))
            .collect();
        Ok(sections.join("\n\n"))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}
