//! The `TaskCreated` event as seen by consumers
//!
//! Producers publish a full [`Task`](crate::Task). Consumers decode into the
//! lenient view below so that missing persistence fields or extra fields added
//! by newer producers never fail a delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryParseError;

/// Name of the durable queue carrying task-created events
pub const TASK_CREATED: &str = "TaskCreated";

/// Consumer-side view of a task-created event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCreatedEvent {
    /// Identifier assigned by the store, if present
    #[serde(rename = "_id", default)]
    pub id: Option<String>,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub user_id: String,

    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl TaskCreatedEvent {
    /// Decode an event from a raw message body
    pub fn decode(payload: &[u8]) -> Result<Self, DeliveryParseError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DeliveryParseError::Empty);
        }
        Ok(serde_json::from_slice(payload)?)
    }
}
