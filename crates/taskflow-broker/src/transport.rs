//! Transport traits
//!
//! The connector, publisher and consumer only talk to these traits, so the
//! same lifecycle code drives RabbitMQ and the in-process broker.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::Deserialize;
use taskflow_types::{ConnectionError, PublishError, SubscribeError};

/// Delivery confirmation mode for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicy {
    /// The broker forgets a message as soon as it is dispatched (at-most-once)
    #[default]
    AutoAck,
    /// The consumer acknowledges after processing; unacknowledged messages
    /// are redelivered (at-least-once)
    ManualAck,
}

/// Dials the broker
#[async_trait]
pub trait Transport: Send + Sync {
    /// Broker address, for logging
    fn address(&self) -> &str;

    /// Open a new connection
    async fn dial(&self) -> Result<Arc<dyn Connection>, ConnectionError>;
}

/// A live session with the broker
#[async_trait]
pub trait Connection: Send + Sync {
    /// Open a channel on this connection
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, ConnectionError>;

    /// Whether the broker still considers the session open
    fn is_connected(&self) -> bool;

    /// Resolves once the connection has been lost
    async fn closed(&self);
}

/// Session-bound handle for queue operations
#[async_trait]
pub trait Channel: Send + Sync {
    /// Declare a durable queue; a no-op if it already exists
    async fn assert_queue(&self, queue: &str) -> Result<(), ConnectionError>;

    /// Enqueue one message on the named queue
    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), PublishError>;

    /// Start consuming the named queue. The stream ends when the channel closes.
    async fn consume(&self, queue: &str, policy: AckPolicy) -> Result<Deliveries, SubscribeError>;

    /// Whether the channel can still be used
    fn is_open(&self) -> bool;
}

/// Stream of deliveries for one subscription
pub type Deliveries = BoxStream<'static, Delivery>;

/// Settles a manually acknowledged delivery
#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(&self) -> Result<(), SubscribeError>;

    async fn reject(&self, requeue: bool) -> Result<(), SubscribeError>;
}

/// A message handed to a consumer
pub struct Delivery {
    payload: Bytes,
    tag: u64,
    redelivered: bool,
    acker: Option<Box<dyn Acker>>,
}

impl Delivery {
    /// Create a delivery that needs no acknowledgment
    pub fn new(payload: impl Into<Bytes>, tag: u64, redelivered: bool) -> Self {
        Self {
            payload: payload.into(),
            tag,
            redelivered,
            acker: None,
        }
    }

    /// Attach the handle used to settle a manually acknowledged delivery
    pub fn with_acker(mut self, acker: impl Acker + 'static) -> Self {
        self.acker = Some(Box::new(acker));
        self
    }

    /// Raw message body
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Broker-assigned delivery tag
    pub fn tag(&self) -> u64 {
        self.tag
    }

    /// Whether this message was delivered before and not acknowledged
    pub fn is_redelivered(&self) -> bool {
        self.redelivered
    }

    /// Acknowledge the delivery. A no-op for auto-acknowledged deliveries.
    pub async fn ack(&self) -> Result<(), SubscribeError> {
        match &self.acker {
            Some(acker) => acker.ack().await,
            None => Ok(()),
        }
    }

    /// Reject the delivery, optionally returning it to the queue. A no-op for
    /// auto-acknowledged deliveries.
    pub async fn reject(&self, requeue: bool) -> Result<(), SubscribeError> {
        match &self.acker {
            Some(acker) => acker.reject(requeue).await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("tag", &self.tag)
            .field("len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .field("manual_ack", &self.acker.is_some())
            .finish()
    }
}
