use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

/// Object-store capability consumed by the core: UTF-8 keys, last-write-wins,
/// no versioning assumed. All of a job's writes live under its artifact
/// prefix.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<(), ArtifactStoreError>;

    async fn upload_text(&self, key: &str, text: &str) -> Result<(), ArtifactStoreError> {
        self.upload(key, Bytes::from(text.to_owned())).await
    }

    async fn download(&self, key: &str) -> Result<Bytes, ArtifactStoreError>;

    async fn download_text(&self, key: &str) -> Result<String, ArtifactStoreError> {
        let bytes = self.download(key).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| ArtifactStoreError::DownloadFailed(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactStoreError>;

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, ArtifactStoreError>;

    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError>;

    async fn delete_batch(&self, keys: &[String]) -> Result<(), ArtifactStoreError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(())
    }

    /// Time-limited GET URL for a key, so clients can download artifacts
    /// without further credentials.
    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ArtifactStoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactStoreError {
    #[error("upload failed: {0}")]
    UploadFailed(String),
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("download failed: {0}")]
    DownloadFailed(String),
    #[error("delete failed: {0}")]
    DeleteFailed(String),
    #[error("presign unsupported: {0}")]
    PresignUnsupported(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
