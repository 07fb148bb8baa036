//! Notification handler for `TaskCreated` events

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use taskflow_broker::DeliveryHandler;
use taskflow_types::{HandlerError, TaskCreatedEvent};
use tracing::{info, warn};

/// Logs a simulated notification for every new task
#[derive(Debug, Default)]
pub struct TaskNotifier {
    notified: AtomicU64,
}

impl TaskNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications sent so far
    pub fn notified(&self) -> u64 {
        self.notified.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DeliveryHandler for TaskNotifier {
    async fn handle(&self, payload: Bytes) -> Result<(), HandlerError> {
        let event = TaskCreatedEvent::decode(&payload).map_err(|e| {
            warn!(error = %e, bytes = payload.len(), "Discarding unreadable TaskCreated message");
            HandlerError::from(e)
        })?;

        info!(task_id = ?event.id, "Received TaskCreated message");
        info!(
            title = %event.title,
            user_id = %event.user_id,
            "Simulating notification for new task {:?} assigned to user {}",
            event.title,
            event.user_id
        );

        self.notified.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
