use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::application::ports::{BrokerError, BrokerMessage, JobBroker};
use crate::domain::JobId;

/// In-process broker over an unbounded mpsc channel. At-least-once within the
/// process: nack with requeue re-sends the message with a bumped attempt
/// counter. Lost messages (process restart) are recovered by the worker's
/// idle queue poll against the metadata store.
pub struct ChannelBroker {
    sender: mpsc::UnboundedSender<BrokerMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<BrokerMessage>>,
}

impl ChannelBroker {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for ChannelBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobBroker for ChannelBroker {
    async fn publish(&self, job_id: JobId) -> Result<(), BrokerError> {
        self.sender
            .send(BrokerMessage { job_id, attempt: 0 })
            .map_err(|e| BrokerError::PublishFailed(e.to_string()))
    }

    async fn receive(&self, timeout: Duration) -> Result<Option<BrokerMessage>, BrokerError> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(BrokerError::Unavailable("channel closed".to_string())),
            Err(_) => Ok(None),
        }
    }

    async fn ack(&self, _message: BrokerMessage) -> Result<(), BrokerError> {
        // The channel hands out each message once; nothing to settle.
        Ok(())
    }

    async fn nack(&self, message: BrokerMessage, requeue: bool) -> Result<(), BrokerError> {
        if requeue {
            self.sender
                .send(BrokerMessage {
                    job_id: message.job_id,
                    attempt: message.attempt + 1,
                })
                .map_err(|e| BrokerError::PublishFailed(e.to_string()))?;
        }
        Ok(())
    }
}
