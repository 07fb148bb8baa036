//! Publisher - emits messages through the registered channel

use bytes::Bytes;
use serde::Serialize;
use taskflow_types::PublishError;
use tracing::debug;

use crate::registry::ChannelRegistry;

/// Fire-and-forget publisher
#[derive(Debug, Clone)]
pub struct Publisher {
    registry: ChannelRegistry,
}

impl Publisher {
    /// Create a publisher reading channels from `registry`
    pub fn new(registry: ChannelRegistry) -> Self {
        Self { registry }
    }

    /// Whether a publish right now would find a channel
    pub fn is_available(&self) -> bool {
        self.registry.is_available()
    }

    /// Enqueue raw bytes on `queue`.
    ///
    /// Fails with [`PublishError::Unavailable`] when no open channel is
    /// registered. Success means the broker accepted the write, not that a
    /// consumer received it.
    pub async fn publish(&self, queue: &str, payload: impl Into<Bytes>) -> Result<(), PublishError> {
        let channel = self.registry.get().ok_or(PublishError::Unavailable)?;
        let payload = payload.into();
        let size = payload.len();

        channel.send_to_queue(queue, payload).await?;

        debug!(queue = %queue, size, "Message published");
        Ok(())
    }

    /// Serialize `record` as JSON and enqueue it on `queue`
    pub async fn publish_json<T>(&self, queue: &str, record: &T) -> Result<(), PublishError>
    where
        T: Serialize + ?Sized,
    {
        if !self.is_available() {
            return Err(PublishError::Unavailable);
        }
        let body = serde_json::to_vec(record)?;
        self.publish(queue, body).await
    }
}
