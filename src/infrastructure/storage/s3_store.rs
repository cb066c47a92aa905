use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path as StorePath;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};

use crate::application::ports::{ArtifactStore, ArtifactStoreError};

/// S3-compatible bucket (R2-style endpoints included).
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

pub struct S3ArtifactStore {
    inner: Arc<AmazonS3>,
}

impl S3ArtifactStore {
    pub fn new(config: &S3Config) -> Result<Self, ArtifactStoreError> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_region(&config.region)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_allow_http(true)
            .build()
            .map_err(|e| ArtifactStoreError::UploadFailed(e.to_string()))?;
        Ok(Self {
            inner: Arc::new(store),
        })
    }
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    async fn upload(&self, key: &str, bytes: Bytes) -> Result<(), ArtifactStoreError> {
        let path = StorePath::from(key);
        self.inner
            .put(&path, PutPayload::from(bytes))
            .await
            .map_err(|e| ArtifactStoreError::UploadFailed(e.to_string()))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes, ArtifactStoreError> {
        let path = StorePath::from(key);
        let result = self
            .inner
            .get(&path)
            .await
            .map_err(|e| ArtifactStoreError::NotFound(e.to_string()))?;
        result
            .bytes()
            .await
            .map_err(|e| ArtifactStoreError::DownloadFailed(e.to_string()))
    }

    async fn exists(&self, key: &str) -> Result<bool, ArtifactStoreError> {
        let path = StorePath::from(key);
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(ArtifactStoreError::DownloadFailed(e.to_string())),
        }
    }

    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>, ArtifactStoreError> {
        let prefix = StorePath::from(prefix);
        let mut stream = self.inner.list(Some(&prefix));
        let mut keys = Vec::new();
        while let Some(meta) = stream.next().await {
            let meta = meta.map_err(|e| ArtifactStoreError::DownloadFailed(e.to_string()))?;
            keys.push(meta.location.to_string());
        }
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), ArtifactStoreError> {
        let path = StorePath::from(key);
        match self.inner.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(ArtifactStoreError::DeleteFailed(e.to_string())),
        }
    }

    async fn presign_get(
        &self,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, ArtifactStoreError> {
        let path = StorePath::from(key);
        let url = self
            .inner
            .signed_url(http::Method::GET, &path, expires_in)
            .await
            .map_err(|e| ArtifactStoreError::PresignUnsupported(e.to_string()))?;
        Ok(url.to_string())
    }
}
