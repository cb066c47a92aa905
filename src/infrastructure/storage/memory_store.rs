use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use object_store::memory::InMemory;
use object_store::path::Path as StorePath;
use object_store::{ObjectStore, PutPayload};

use crate::application::ports::{ArtifactStore, ArtifactStoreError};

/// In-memory store for the test suites and throwaway runs.
#[derive(Default)]
pub struct MemoryArtifactStore {
    inner: InMemory,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
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
        _expires_in: Duration,
    ) -> Result<String, ArtifactStoreError> {
        if !self.exists(key).await? {
            return Err(ArtifactStoreError::NotFound(key.to_string()));
        }
        Ok(format!("memory://{key}"))
    }
}
