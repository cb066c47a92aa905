use std::time::Duration;

use async_trait::async_trait;

use crate::domain::JobId;

/// A message as delivered by the broker. Delivery is at-least-once; side
/// effects downstream are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerMessage {
    pub job_id: JobId,
    pub attempt: u32,
}

/// Minimal broker contract: the queue is the only inter-process notification
/// channel for job arrivals.
#[async_trait]
pub trait JobBroker: Send + Sync {
    async fn publish(&self, job_id: JobId) -> Result<(), BrokerError>;

    /// Wait up to `timeout` for the next message; None on idle timeout.
    async fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError>;

    async fn ack(&self, message: BrokerMessage) -> Result<(), BrokerError>;

    /// Negative-acknowledge; when `requeue` is set the message is redelivered
    /// with an incremented attempt counter.
    async fn nack(&self, message: BrokerMessage, requeue: bool) -> Result<(), BrokerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
}
