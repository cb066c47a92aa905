//! Backend A: API-keyed vision provider speaking a chat-completions wire
//! format with a base64 inline image.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::application::ports::{OcrBackend, OcrBackendError, OcrPrompt};

const MAX_ATTEMPTS: u32 = 3;

pub struct VisionApiBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl VisionApiBackend {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        model: String,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url,
            model,
        }
    }

    async fn send_once(
        &self,
        body: &serde_json::Value,
    ) -> Result<String, (OcrBackendError, bool)> {
        let response = self
            .client
            .post(format!(
                "{}/api/v1/chat/completions",
                self.base_url.trim_end_matches('/')
            ))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(body)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| (OcrBackendError::RequestFailed(e.to_string()), true))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err((OcrBackendError::RateLimited, true));
        }
        if status.is_server_error() {
            return Err((
                OcrBackendError::RequestFailed(format!("HTTP {status}")),
                true,
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err((
                OcrBackendError::RequestFailed(format!("HTTP {status}: {body}")),
                false,
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| (OcrBackendError::BadResponse(e.to_string()), false))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or((
                OcrBackendError::BadResponse("response carries no choices".to_string()),
                false,
            ))
    }
}

#[async_trait]
impl OcrBackend for VisionApiBackend {
    async fn recognize(
        &self,
        image_png: &[u8],
        prompt: &OcrPrompt,
        json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError> {
        let data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image_png)
        );

        let mut body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": prompt.system},
                {"role": "user", "content": [
                    {"type": "text", "text": prompt.user},
                    {"type": "image_url", "image_url": {"url": data_url}},
                ]},
            ],
        });

        let json_mode = json_mode.unwrap_or_else(|| prompt.wants_json());
        if json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        let mut last_error = OcrBackendError::RequestFailed("no attempt made".to_string());
        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                // Exponential backoff: 2^k seconds between attempts.
                tokio::time::sleep(Duration::from_secs(1 << attempt)).await;
            }
            match self.send_once(&body).await {
                Ok(text) => return Ok(text),
                Err((error, transient)) => {
                    tracing::warn!(
                        backend = self.name(),
                        model = %self.model,
                        attempt,
                        transient,
                        error = %error,
                        "Vision request failed"
                    );
                    if !transient {
                        return Err(error);
                    }
                    last_error = error;
                }
            }
        }
        Err(last_error)
    }

    fn name(&self) -> &'static str {
        "vision_api"
    }
}
