//! In-memory storage backend
//!
//! Fast, non-persistent storage for development and testing.
//! All data is lost when the process exits.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use taskflow_types::{StoreError, StoreResult, Task, TaskId, User, UserId, UserUpdate};
use tracing::{debug, info};

use crate::traits::{TaskStore, UserStore};

/// User plus its insertion sequence number, for stable listing
struct StoredUser {
    seq: u64,
    user: User,
}

/// In-memory storage implementation
pub struct MemoryStore {
    tasks: DashMap<TaskId, Task>,
    users: DashMap<UserId, StoredUser>,
    /// Unique index: email -> owner
    emails: DashMap<String, UserId>,
    next_seq: AtomicU64,
}

impl MemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        info!("Initializing in-memory storage");
        Self {
            tasks: DashMap::new(),
            users: DashMap::new(),
            emails: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        self.tasks.insert(task.id, task.clone());
        debug!(task_id = %task.id, user_id = %task.user_id, "Task stored");
        Ok(task)
    }

    async fn list_tasks(&self) -> StoreResult<Vec<Task>> {
        let mut tasks: Vec<Task> = self.tasks.iter().map(|t| t.clone()).collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn insert_user(&self, user: User) -> StoreResult<User> {
        match self.emails.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("Email".to_string())),
            Entry::Vacant(slot) => {
                slot.insert(user.id);
                let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
                self.users.insert(
                    user.id,
                    StoredUser {
                        seq,
                        user: user.clone(),
                    },
                );
                info!(user_id = %user.id, "User stored");
                Ok(user)
            }
        }
    }

    async fn get_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        Ok(self.users.get(id).map(|u| u.user.clone()))
    }

    async fn list_users(&self) -> StoreResult<Vec<User>> {
        let mut stored: Vec<(u64, User)> = self
            .users
            .iter()
            .map(|u| (u.seq, u.user.clone()))
            .collect();
        stored.sort_by_key(|(seq, _)| *seq);
        Ok(stored.into_iter().map(|(_, user)| user).collect())
    }

    async fn update_user(&self, id: &UserId, update: UserUpdate) -> StoreResult<Option<User>> {
        // The user's entry stays locked until the email index agrees with it
        let Some(mut stored) = self.users.get_mut(id) else {
            return Ok(None);
        };

        if let Some(username) = &update.username {
            if username.trim().is_empty() {
                return Err(StoreError::Invalid("Username must not be empty.".to_string()));
            }
        }

        if let Some(email) = update.email.as_ref().filter(|e| **e != stored.user.email) {
            if email.trim().is_empty() {
                return Err(StoreError::Invalid("Email must not be empty.".to_string()));
            }
            match self.emails.entry(email.clone()) {
                Entry::Occupied(_) => return Err(StoreError::Duplicate("Email".to_string())),
                Entry::Vacant(slot) => {
                    slot.insert(*id);
                }
            }
            self.emails.remove_if(&stored.user.email, |_, owner| owner == id);
        }

        if let Some(username) = update.username {
            stored.user.username = username;
        }
        if let Some(email) = update.email {
            stored.user.email = email;
        }

        debug!(user_id = %id, "User updated");
        Ok(Some(stored.user.clone()))
    }

    async fn delete_user(&self, id: &UserId) -> StoreResult<Option<User>> {
        match self.users.remove(id) {
            Some((_, stored)) => {
                self.emails.remove_if(&stored.user.email, |_, owner| owner == id);
                info!(user_id = %id, "User deleted");
                Ok(Some(stored.user))
            }
            None => Ok(None),
        }
    }
}
