//! Task records
//!
//! A task is the payload of the `TaskCreated` event, so its JSON shape is
//! part of the broker wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a create-task request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    /// Short task title
    #[serde(default)]
    pub title: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Owner of the task
    #[serde(default)]
    pub user_id: String,
}

/// A stored task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    #[serde(rename = "_id")]
    pub id: TaskId,

    /// Short task title
    pub title: String,

    /// Free-form description
    pub description: String,

    /// Owner of the task
    pub user_id: String,

    /// When the task was stored
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task from a request body, stamped with a fresh id and the
    /// current time
    pub fn new(new_task: NewTask) -> Self {
        Self {
            id: TaskId::new(),
            title: new_task.title,
            description: new_task.description,
            user_id: new_task.user_id,
            created_at: Utc::now(),
        }
    }
}
