//! Backend B: segmentation+OCR provider. The crop is wrapped into a
//! single-page PDF, submitted, and the markdown result is fetched by polling
//! the provider's status endpoint. Calls are additionally gated by the
//! provider's own rate policy on top of the process-global limiter.

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::ImageFormat;
use serde::Deserialize;

use crate::application::ports::{OcrBackend, OcrBackendError, OcrPrompt};
use crate::application::services::RateLimiter;

pub struct SegmentationBackend {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    limiter: Arc<RateLimiter>,
    poll_interval: Duration,
    poll_max_attempts: u32,
}

#[derive(Deserialize)]
struct SubmitResponse {
    request_id: String,
}

#[derive(Deserialize)]
struct PollResponse {
    status: String,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SegmentationBackend {
    pub fn new(
        client: reqwest::Client,
        api_key: String,
        base_url: String,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            api_key,
            base_url,
            limiter,
            poll_interval: Duration::from_secs(3),
            poll_max_attempts: 90,
        }
    }
}

#[async_trait]
impl OcrBackend for SegmentationBackend {
    async fn recognize(
        &self,
        image_png: &[u8],
        _prompt: &OcrPrompt,
        _json_mode: Option<bool>,
    ) -> Result<String, OcrBackendError> {
        let pdf = png_to_single_page_pdf(image_png)
            .map_err(|e| OcrBackendError::BadResponse(format!("pdf wrap: {e}")))?;

        let permit = self
            .limiter
            .acquire(Duration::from_secs(300))
            .await
            .ok_or(OcrBackendError::RateLimited)?;

        let base = self.base_url.trim_end_matches('/');
        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(pdf)
                    .file_name("crop.pdf")
                    .mime_str("application/pdf")
                    .map_err(|e| OcrBackendError::RequestFailed(e.to_string()))?,
            )
            .text("output_format", "markdown");

        let response = self
            .client
            .post(format!("{base}/api/v1/marker"))
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .timeout(Duration::from_secs(120))
            .send()
            .await
            .map_err(|e| OcrBackendError::RequestFailed(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            drop(permit);
            return Err(OcrBackendError::RateLimited);
        }
        if !response.status().is_success() {
            let status = response.status();
            drop(permit);
            return Err(OcrBackendError::RequestFailed(format!("HTTP {status}")));
        }

        let submitted: SubmitResponse = response
            .json()
            .await
            .map_err(|e| OcrBackendError::BadResponse(e.to_string()))?;

        let result = self.poll_until_complete(base, &submitted.request_id).await;
        drop(permit);
        result
    }

    fn name(&self) -> &'static str {
        "segmentation"
    }
}

impl SegmentationBackend {
    async fn poll_until_complete(
        &self,
        base: &str,
        request_id: &str,
    ) -> Result<String, OcrBackendError> {
        for _ in 0..self.poll_max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let response = self
                .client
                .get(format!("{base}/api/v1/marker/{request_id}"))
                .header("X-Api-Key", &self.api_key)
                .timeout(Duration::from_secs(30))
                .send()
                .await
                .map_err(|e| OcrBackendError::RequestFailed(e.to_string()))?;

            if !response.status().is_success() {
                continue;
            }

            let poll: PollResponse = response
                .json()
                .await
                .map_err(|e| OcrBackendError::BadResponse(e.to_string()))?;

            match poll.status.as_str() {
                "complete" => {
                    return poll.markdown.ok_or_else(|| {
                        OcrBackendError::BadResponse("complete without markdown".to_string())
                    });
                }
                "failed" => {
                    return Err(OcrBackendError::BadResponse(
                        poll.error.unwrap_or_else(|| "provider failure".to_string()),
                    ));
                }
                _ => {}
            }
        }
        Err(OcrBackendError::Timeout(format!(
            "request {request_id} not complete after {} polls",
            self.poll_max_attempts
        )))
    }
}

/// Wrap a PNG crop into a minimal single-page PDF with the image re-encoded
/// as a DCT (JPEG) stream, sized 1pt per pixel.
fn png_to_single_page_pdf(png: &[u8]) -> Result<Vec<u8>, String> {
    let decoded = image::load_from_memory(png).map_err(|e| e.to_string())?;
    let (width, height) = (decoded.width(), decoded.height());

    let mut jpeg: Vec<u8> = Vec::new();
    decoded
        .to_rgb8()
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| e.to_string())?;

    let mut pdf: Vec<u8> = Vec::new();
    let mut offsets: Vec<usize> = Vec::new();
    pdf.extend_from_slice(b"%PDF-1.4\n");

    let content = format!("q {width} 0 0 {height} 0 0 cm /Im0 Do Q");
    let objects: Vec<Vec<u8>> = vec![
        b"<< /Type /Catalog /Pages 2 0 R >>".to_vec(),
        b"<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_vec(),
        format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {width} {height}] \
             /Resources << /XObject << /Im0 4 0 R >> >> /Contents 5 0 R >>"
        )
        .into_bytes(),
        {
            let mut obj = format!(
                "<< /Type /XObject /Subtype /Image /Width {width} /Height {height} \
                 /ColorSpace /DeviceRGB /BitsPerComponent 8 /Filter /DCTDecode \
                 /Length {} >>\nstream\n",
                jpeg.len()
            )
            .into_bytes();
            obj.extend_from_slice(&jpeg);
            obj.extend_from_slice(b"\nendstream");
            obj
        },
        {
            let mut obj = format!("<< /Length {} >>\nstream\n", content.len()).into_bytes();
            obj.extend_from_slice(content.as_bytes());
            obj.extend_from_slice(b"\nendstream");
            obj
        },
    ];

    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.extend_from_slice(format!("{} 0 obj\n", i + 1).as_bytes());
        pdf.extend_from_slice(body);
        pdf.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = pdf.len();
    pdf.extend_from_slice(format!("xref\n0 {}\n", objects.len() + 1).as_bytes());
    pdf.extend_from_slice(b"0000000000 65535 f \n");
    for offset in &offsets {
        pdf.extend_from_slice(format!("{offset:010} 00000 n \n").as_bytes());
    }
    pdf.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref_offset}\n%%EOF\n",
            objects.len() + 1
        )
        .as_bytes(),
    );

    Ok(pdf)
}
