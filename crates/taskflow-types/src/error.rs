//! Error types for TaskFlow
//!
//! Broker-layer errors are split by the boundary where they are handled:
//! connecting (retried), publishing (surfaced to HTTP callers), subscribing,
//! and per-message handling (logged, never fatal).

use thiserror::Error;

/// Failure while establishing a broker session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The broker could not be reached
    #[error("Failed to dial broker at {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// The connection was established but no channel could be opened
    #[error("Failed to open channel: {0}")]
    Channel(String),

    /// Declaring the durable queue failed
    #[error("Failed to assert queue {queue}: {reason}")]
    QueueAssert { queue: String, reason: String },

    /// A post-connect hook, such as registering a consumer, failed
    #[error("Post-connect setup failed: {0}")]
    Setup(String),

    /// Every attempt in the retry budget failed
    #[error("Gave up connecting after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<ConnectionError>,
    },
}

/// Failure while publishing a message
#[derive(Error, Debug)]
pub enum PublishError {
    /// No open channel is registered
    #[error("Message broker is not connected")]
    Unavailable,

    /// The record could not be serialized
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The broker rejected the write
    #[error("Broker error: {0}")]
    Broker(String),
}

impl PublishError {
    /// Whether the caller may retry the same publish later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable | Self::Broker(_))
    }
}

/// Failure while registering or running a subscription
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscribeError {
    /// The broker refused the consume request
    #[error("Failed to consume from {queue}: {reason}")]
    Consume { queue: String, reason: String },

    /// The channel closed underneath the subscription
    #[error("Channel closed")]
    ChannelClosed,

    /// Acknowledging or rejecting a delivery failed
    #[error("Failed to settle delivery {tag}: {reason}")]
    Settle { tag: u64, reason: String },
}

/// A message body that could not be decoded
#[derive(Error, Debug)]
pub enum DeliveryParseError {
    /// The body was empty
    #[error("Empty message body")]
    Empty,

    /// The body was not the expected JSON document
    #[error("Malformed message body: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome reported by a delivery handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The message can never be processed; do not redeliver
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Processing failed but may succeed on redelivery
    #[error("Transient failure: {0}")]
    Transient(String),
}

impl From<DeliveryParseError> for HandlerError {
    fn from(err: DeliveryParseError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// Errors raised by the document store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found
    #[error("{0} not found")]
    NotFound(String),

    /// A unique field already exists
    #[error("{0} already exists")]
    Duplicate(String),

    /// The record failed validation
    #[error("{0}")]
    Invalid(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;
