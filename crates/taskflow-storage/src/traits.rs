//! Store trait definitions
//!
//! Defines the interface that all storage backends must implement.

use async_trait::async_trait;
use taskflow_types::{StoreResult, Task, User, UserId, UserUpdate};

/// Task persistence
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a new task
    async fn insert_task(&self, task: Task) -> StoreResult<Task>;

    /// List all tasks, oldest first
    async fn list_tasks(&self) -> StoreResult<Vec<Task>>;
}

/// User persistence; email addresses are unique
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Store a new user
    async fn insert_user(&self, user: User) -> StoreResult<User>;

    /// Get a user by id
    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>>;

    /// List all users in insertion order
    async fn list_users(&self) -> StoreResult<Vec<User>>;

    /// Apply a partial update, returning the updated user
    async fn update_user(&self, id: &UserId, update: UserUpdate) -> StoreResult<Option<User>>;

    /// Delete a user, returning the removed record
    async fn delete_user(&self, id: &UserId) -> StoreResult<Option<User>>;
}
