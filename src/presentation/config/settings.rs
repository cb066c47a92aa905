use std::str::FromStr;
use std::time::Duration;

use crate::application::services::pipeline::PipelineConfig;
use crate::application::services::WorkerConfig;
use crate::domain::EngineKind;
use crate::infrastructure::ocr::BackendConfig;
use crate::infrastructure::storage::S3Config;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
    #[error("missing required setting: {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackendKind {
    S3,
    Local,
    Memory,
}

/// Process-wide configuration snapshot, loaded from the environment at boot.
/// Per-job model overrides come from JobSettings rows, not from here.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server_port: u16,
    pub api_key: Option<String>,
    pub log_json: bool,

    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub database_connect_retries: u32,

    pub storage_backend: StorageBackendKind,
    pub storage_local_path: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key_id: String,
    pub s3_secret_access_key: String,

    pub max_concurrent_jobs: u32,
    pub ocr_threads_per_job: usize,
    pub max_global_ocr_requests: u32,
    pub pdf_render_dpi: u32,
    pub max_queue_size: u32,
    pub debounce_interval_s: f64,
    pub poll_interval_s: u64,
    pub task_time_limit_s: u64,
    pub backend_b_max_rpm: u32,
    pub backend_b_max_concurrent: u32,
    pub strip_merge_gap_px: u32,
    pub strip_max_height_px: u32,
    pub fuzzy_threshold: usize,
    pub presign_expiry_s: u64,

    pub default_engine: EngineKind,
    pub vision_api_key: String,
    pub vision_base_url: String,
    pub segmentation_api_key: String,
    pub segmentation_base_url: String,
    pub default_text_model: String,
    pub default_image_model: String,
    pub default_stamp_model: String,
}

fn get_parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        Err(_) => Ok(default),
    }
}

fn get_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let storage_backend = match get_string("STORAGE_BACKEND", "local").as_str() {
            "s3" => StorageBackendKind::S3,
            "local" => StorageBackendKind::Local,
            "memory" => StorageBackendKind::Memory,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "STORAGE_BACKEND",
                    value: other.to_string(),
                });
            }
        };

        let default_engine_raw = get_string("DEFAULT_ENGINE", "vision_api");
        let default_engine =
            EngineKind::from_str(&default_engine_raw).map_err(|_| ConfigError::InvalidValue {
                key: "DEFAULT_ENGINE",
                value: default_engine_raw,
            })?;

        let settings = Self {
            server_port: get_parsed("SERVER_PORT", 3000)?,
            api_key: std::env::var("REMOTE_OCR_API_KEY").ok().filter(|s| !s.is_empty()),
            log_json: get_parsed("LOG_JSON", false)?,

            database_url: std::env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            database_max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", 10)?,
            database_connect_retries: get_parsed("DATABASE_CONNECT_RETRIES", 5)?,

            storage_backend,
            storage_local_path: get_string("STORAGE_LOCAL_PATH", "./data/storage"),
            s3_endpoint: get_string("S3_ENDPOINT", ""),
            s3_region: get_string("S3_REGION", "auto"),
            s3_bucket: get_string("S3_BUCKET", ""),
            s3_access_key_id: get_string("S3_ACCESS_KEY_ID", ""),
            s3_secret_access_key: get_string("S3_SECRET_ACCESS_KEY", ""),

            max_concurrent_jobs: get_parsed("MAX_CONCURRENT_JOBS", 4)?,
            ocr_threads_per_job: get_parsed("OCR_THREADS_PER_JOB", 2)?,
            max_global_ocr_requests: get_parsed("MAX_GLOBAL_OCR_REQUESTS", 8)?,
            pdf_render_dpi: get_parsed("PDF_RENDER_DPI", 300)?,
            max_queue_size: get_parsed("MAX_QUEUE_SIZE", 100)?,
            debounce_interval_s: get_parsed("DEBOUNCE_INTERVAL_S", 3.0)?,
            poll_interval_s: get_parsed("POLL_INTERVAL_S", 10)?,
            task_time_limit_s: get_parsed("TASK_TIME_LIMIT_S", 3600)?,
            backend_b_max_rpm: get_parsed("BACKEND_B_MAX_RPM", 180)?,
            backend_b_max_concurrent: get_parsed("BACKEND_B_MAX_CONCURRENT", 5)?,
            strip_merge_gap_px: get_parsed("STRIP_MERGE_GAP_PX", 20)?,
            strip_max_height_px: get_parsed("MAX_STRIP_HEIGHT", 6000)?,
            fuzzy_threshold: get_parsed("FUZZY_THRESHOLD", 2)?,
            presign_expiry_s: get_parsed("PRESIGN_EXPIRY_S", 3600)?,

            default_engine,
            vision_api_key: get_string("VISION_API_KEY", ""),
            vision_base_url: get_string("VISION_BASE_URL", "https://openrouter.ai"),
            segmentation_api_key: get_string("SEGMENTATION_API_KEY", ""),
            segmentation_base_url: get_string("SEGMENTATION_BASE_URL", "https://www.datalab.to"),
            default_text_model: get_string("DEFAULT_TEXT_MODEL", "qwen/qwen3-vl-30b-a3b-instruct"),
            default_image_model: get_string(
                "DEFAULT_IMAGE_MODEL",
                "qwen/qwen3-vl-30b-a3b-instruct",
            ),
            default_stamp_model: get_string(
                "DEFAULT_STAMP_MODEL",
                "qwen/qwen3-vl-30b-a3b-instruct",
            ),
        };

        if settings.storage_backend == StorageBackendKind::S3 && settings.s3_bucket.is_empty() {
            return Err(ConfigError::Missing("S3_BUCKET"));
        }

        Ok(settings)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            render_dpi: self.pdf_render_dpi,
            strip_merge_gap_px: self.strip_merge_gap_px,
            strip_max_height_px: self.strip_max_height_px,
            ocr_threads_per_job: self.ocr_threads_per_job,
            fuzzy_threshold: self.fuzzy_threshold,
            rate_limit_timeout_s: 300,
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            poll_interval: Duration::from_secs(self.poll_interval_s),
            task_time_limit: Duration::from_secs(self.task_time_limit_s),
            max_attempts: 3,
            pipeline: self.pipeline_config(),
        }
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig {
            vision_api_key: self.vision_api_key.clone(),
            vision_base_url: self.vision_base_url.clone(),
            segmentation_api_key: self.segmentation_api_key.clone(),
            segmentation_base_url: self.segmentation_base_url.clone(),
            default_text_model: self.default_text_model.clone(),
            default_image_model: self.default_image_model.clone(),
            default_stamp_model: self.default_stamp_model.clone(),
        }
    }

    pub fn s3_config(&self) -> S3Config {
        S3Config {
            endpoint: self.s3_endpoint.clone(),
            region: self.s3_region.clone(),
            bucket: self.s3_bucket.clone(),
            access_key_id: self.s3_access_key_id.clone(),
            secret_access_key: self.s3_secret_access_key.clone(),
        }
    }
}
