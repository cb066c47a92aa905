use std::sync::Arc;

use crate::application::ports::OcrBackend;
use crate::application::services::pipeline::Dispatcher;
use crate::application::services::{BackendFactory, RateLimiter};
use crate::domain::{EngineKind, JobSettings};

use super::{EchoBackend, SegmentationBackend, VisionApiBackend};

/// Provider credentials and default model selectors, snapshotted at boot.
/// Per-job overrides come from the job's settings row.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub vision_api_key: String,
    pub vision_base_url: String,
    pub segmentation_api_key: String,
    pub segmentation_base_url: String,
    pub default_text_model: String,
    pub default_image_model: String,
    pub default_stamp_model: String,
}

pub struct OcrBackendFactory {
    config: BackendConfig,
    client: reqwest::Client,
    /// Process-global ceiling across all jobs and backends.
    global_limiter: Arc<RateLimiter>,
    /// Backend B's own provider policy.
    segmentation_limiter: Arc<RateLimiter>,
}

impl OcrBackendFactory {
    pub fn new(
        config: BackendConfig,
        global_limiter: Arc<RateLimiter>,
        segmentation_limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            global_limiter,
            segmentation_limiter,
        }
    }

    fn vision_backend(&self, model: &str) -> Arc<dyn OcrBackend> {
        Arc::new(VisionApiBackend::new(
            self.client.clone(),
            self.config.vision_api_key.clone(),
            self.config.vision_base_url.clone(),
            model.to_string(),
        ))
    }

    fn pick<'a>(candidates: &[&'a str], fallback: &'a str) -> &'a str {
        candidates
            .iter()
            .copied()
            .find(|m| !m.is_empty())
            .unwrap_or(fallback)
    }
}

impl BackendFactory for OcrBackendFactory {
    fn dispatcher(&self, engine: EngineKind, settings: &JobSettings) -> Dispatcher {
        let text_model = Self::pick(
            &[settings.text_model.as_str(), settings.table_model.as_str()],
            &self.config.default_text_model,
        );
        let image_model = Self::pick(
            &[settings.image_model.as_str(), settings.text_model.as_str()],
            &self.config.default_image_model,
        );
        let stamp_model = Self::pick(
            &[settings.stamp_model.as_str(), settings.image_model.as_str()],
            &self.config.default_stamp_model,
        );

        let strip_backend: Arc<dyn OcrBackend> = match engine {
            EngineKind::VisionApi => self.vision_backend(text_model),
            EngineKind::Segmentation => Arc::new(SegmentationBackend::new(
                self.client.clone(),
                self.config.segmentation_api_key.clone(),
                self.config.segmentation_base_url.clone(),
                Arc::clone(&self.segmentation_limiter),
            )),
            EngineKind::Echo => Arc::new(EchoBackend::new()),
        };

        // Image and stamp blocks always go through the vision provider; the
        // segmentation provider has no prompt channel for them.
        let (image_backend, stamp_backend): (Arc<dyn OcrBackend>, Arc<dyn OcrBackend>) =
            match engine {
                EngineKind::Echo => {
                    let echo: Arc<dyn OcrBackend> = Arc::new(EchoBackend::new());
                    (Arc::clone(&echo), echo)
                }
                _ => (
                    self.vision_backend(image_model),
                    self.vision_backend(stamp_model),
                ),
            };

        Dispatcher {
            strip_backend,
            image_backend,
            stamp_backend,
            limiter: Arc::clone(&self.global_limiter),
        }
    }
}
