use std::sync::Arc;

use crate::application::ports::{JobStore, JobStoreError};
use crate::domain::JobStatus;

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct QueueDepth {
    pub queued: u64,
    pub processing: u64,
    pub max: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("queue is full ({current}/{max})")]
    QueueFull { current: u64, max: u32 },
    #[error(transparent)]
    Store(#[from] JobStoreError),
}

/// Soft admission guard against the queued+processing population. Race
/// windows between the check and the insert are acceptable; the worker-side
/// claim self-corrects.
pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    max_queue_size: u32,
}

impl AdmissionController {
    pub fn new(store: Arc<dyn JobStore>, max_queue_size: u32) -> Self {
        Self {
            store,
            max_queue_size,
        }
    }

    pub async fn depth(&self) -> Result<QueueDepth, JobStoreError> {
        let queued = self.store.count_by_status(JobStatus::Queued).await?;
        let processing = self.store.count_by_status(JobStatus::Processing).await?;
        Ok(QueueDepth {
            queued,
            processing,
            max: self.max_queue_size,
        })
    }

    /// Reject a create when depth has reached the cap; 0 disables the cap.
    pub async fn admit(&self) -> Result<(), AdmissionError> {
        if self.max_queue_size == 0 {
            return Ok(());
        }
        let depth = self.depth().await?;
        let current = depth.queued + depth.processing;
        if current >= u64::from(self.max_queue_size) {
            tracing::warn!(
                queued = depth.queued,
                processing = depth.processing,
                max = self.max_queue_size,
                "Admission rejected: queue saturated"
            );
            return Err(AdmissionError::QueueFull {
                current,
                max: self.max_queue_size,
            });
        }
        Ok(())
    }
}
