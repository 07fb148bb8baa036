//! TaskFlow Broker - Broker connection lifecycle for the TaskFlow services
//!
//! This crate contains:
//! - Connector: dials the broker with a bounded retry policy and asserts the
//!   durable queue, optionally supervising the connection afterwards
//! - ChannelRegistry: the injectable "current channel or absent" handle
//! - Publisher / Consumer: emit and receive events over that channel
//! - Transport engines: AMQP (`lapin`) and an in-process broker

pub mod connector;
pub mod consumer;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod transport;

#[cfg(feature = "amqp")]
pub mod amqp;

#[cfg(feature = "memory")]
pub mod memory;

// Re-exports
pub use connector::{Connector, ConnectorConfig, OnConnected};
pub use consumer::{Consumer, DeliveryHandler, Subscription};
pub use publisher::Publisher;
pub use registry::ChannelRegistry;
pub use retry::{retry, Exhausted, RetryPolicy};
pub use transport::{AckPolicy, Channel, Connection, Deliveries, Delivery, Transport};

#[cfg(feature = "amqp")]
pub use amqp::AmqpTransport;

#[cfg(feature = "memory")]
pub use memory::MemoryBroker;
