//! TaskFlow Types - Shared domain types for the TaskFlow services
//!
//! This crate contains the records, events and error types used by the
//! broker layer, the storage layer and the HTTP services.

pub mod error;
pub mod event;
pub mod task;
pub mod user;

// Re-export commonly used types
pub use error::{
    ConnectionError, DeliveryParseError, HandlerError, PublishError, StoreError, StoreResult,
    SubscribeError,
};
pub use event::{TaskCreatedEvent, TASK_CREATED};
pub use task::{NewTask, Task, TaskId};
pub use user::{NewUser, User, UserId, UserUpdate};
