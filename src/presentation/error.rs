use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::application::ports::{
    ArtifactStoreError, BrokerError, JobStoreError, TreeStoreError,
};
use crate::application::services::AdmissionError;
use crate::domain::InvalidTransition;

/// Boundary error surface; every failure maps to one stable wire kind.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("missing or invalid API key")]
    Unauthorized,
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidTransition(String),
    #[error("queue is full ({current}/{max})")]
    QueueFull { current: u64, max: u32 },
    #[error("object storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("metadata store unavailable: {0}")]
    MetadataUnavailable(String),
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),
    #[error("{0}")]
    NotReady(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    detail: String,
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::InvalidInput(_) => "invalid_input",
            ApiError::Unauthorized => "unauthorized",
            ApiError::NotFound(_) => "not_found",
            ApiError::InvalidTransition(_) => "invalid_transition",
            ApiError::QueueFull { .. } => "queue_full",
            ApiError::StorageUnavailable(_) => "storage_unavailable",
            ApiError::MetadataUnavailable(_) => "metadata_unavailable",
            ApiError::BrokerUnavailable(_) => "broker_unavailable",
            ApiError::NotReady(_) => "not_ready",
            ApiError::Internal(_) => "internal",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidInput(_) | ApiError::NotReady(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::InvalidTransition(_) => StatusCode::CONFLICT,
            ApiError::QueueFull { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::StorageUnavailable(_)
            | ApiError::MetadataUnavailable(_)
            | ApiError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.kind(),
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JobStoreError> for ApiError {
    fn from(e: JobStoreError) -> Self {
        match e {
            JobStoreError::NotFound(detail) => ApiError::NotFound(detail),
            other => ApiError::MetadataUnavailable(other.to_string()),
        }
    }
}

impl From<ArtifactStoreError> for ApiError {
    fn from(e: ArtifactStoreError) -> Self {
        match e {
            ArtifactStoreError::NotFound(detail) => ApiError::NotFound(detail),
            other => ApiError::StorageUnavailable(other.to_string()),
        }
    }
}

impl From<BrokerError> for ApiError {
    fn from(e: BrokerError) -> Self {
        ApiError::BrokerUnavailable(e.to_string())
    }
}

impl From<TreeStoreError> for ApiError {
    fn from(e: TreeStoreError) -> Self {
        match e {
            TreeStoreError::NotFound(detail) => ApiError::NotFound(detail),
            other => ApiError::MetadataUnavailable(other.to_string()),
        }
    }
}

impl From<AdmissionError> for ApiError {
    fn from(e: AdmissionError) -> Self {
        match e {
            AdmissionError::QueueFull { current, max } => ApiError::QueueFull { current, max },
            AdmissionError::Store(store) => store.into(),
        }
    }
}

impl From<InvalidTransition> for ApiError {
    fn from(e: InvalidTransition) -> Self {
        ApiError::InvalidTransition(e.to_string())
    }
}
