//! RabbitMQ transport built on `lapin`

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ConnectionProperties};
use taskflow_types::{ConnectionError, PublishError, SubscribeError};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::transport::{
    AckPolicy, Acker, Channel, Connection, Deliveries, Delivery, Transport,
};

/// Persistent messages survive a broker restart on a durable queue
const PERSISTENT: u8 = 2;

/// Dials a RabbitMQ broker at an `amqp://` URI
#[derive(Debug, Clone)]
pub struct AmqpTransport {
    uri: String,
}

impl AmqpTransport {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Transport for AmqpTransport {
    fn address(&self) -> &str {
        &self.uri
    }

    async fn dial(&self) -> Result<Arc<dyn Connection>, ConnectionError> {
        let connection = lapin::Connection::connect(&self.uri, ConnectionProperties::default())
            .await
            .map_err(|e| ConnectionError::Dial {
                addr: self.uri.clone(),
                reason: e.to_string(),
            })?;

        let lost = Arc::new(AtomicBool::new(false));
        let lost_signal = Arc::new(Notify::new());
        {
            let lost = Arc::clone(&lost);
            let lost_signal = Arc::clone(&lost_signal);
            connection.on_error(move |err| {
                warn!(error = %err, "Broker connection error");
                lost.store(true, Ordering::SeqCst);
                lost_signal.notify_waiters();
            });
        }

        debug!(uri = %self.uri, "AMQP connection established");
        Ok(Arc::new(AmqpConnection {
            connection,
            lost,
            lost_signal,
        }))
    }
}

struct AmqpConnection {
    connection: lapin::Connection,
    lost: Arc<AtomicBool>,
    lost_signal: Arc<Notify>,
}

#[async_trait]
impl Connection for AmqpConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, ConnectionError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| ConnectionError::Channel(e.to_string()))?;
        Ok(Arc::new(AmqpChannel { channel }))
    }

    fn is_connected(&self) -> bool {
        !self.lost.load(Ordering::SeqCst) && self.connection.status().connected()
    }

    async fn closed(&self) {
        loop {
            // Registered before the check so a concurrent notify is not missed
            let notified = self.lost_signal.notified();
            if !self.is_connected() {
                return;
            }
            notified.await;
        }
    }
}

struct AmqpChannel {
    channel: lapin::Channel,
}

#[async_trait]
impl Channel for AmqpChannel {
    async fn assert_queue(&self, queue: &str) -> Result<(), ConnectionError> {
        self.channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| ConnectionError::QueueAssert {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), PublishError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        // Publisher confirms are not awaited
        self.channel
            .basic_publish("", queue, BasicPublishOptions::default(), &payload, properties)
            .await
            .map_err(|e| PublishError::Broker(e.to_string()))?;
        Ok(())
    }

    async fn consume(&self, queue: &str, policy: AckPolicy) -> Result<Deliveries, SubscribeError> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                "",
                BasicConsumeOptions {
                    no_ack: policy == AckPolicy::AutoAck,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SubscribeError::Consume {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        let stream = futures::stream::unfold(consumer, move |mut consumer| async move {
            match consumer.next().await {
                Some(Ok(delivery)) => Some((convert(delivery, policy), consumer)),
                Some(Err(e)) => {
                    warn!(error = %e, "Consumer stream failed");
                    None
                }
                None => None,
            }
        });
        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.channel.status().connected()
    }
}

fn convert(delivery: lapin::message::Delivery, policy: AckPolicy) -> Delivery {
    let lapin::message::Delivery {
        data,
        delivery_tag,
        redelivered,
        acker,
        ..
    } = delivery;

    let converted = Delivery::new(Bytes::from(data), delivery_tag, redelivered);
    match policy {
        AckPolicy::AutoAck => converted,
        AckPolicy::ManualAck => converted.with_acker(AmqpAcker {
            tag: delivery_tag,
            acker,
        }),
    }
}

struct AmqpAcker {
    tag: u64,
    acker: lapin::acker::Acker,
}

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(&self) -> Result<(), SubscribeError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| SubscribeError::Settle {
                tag: self.tag,
                reason: e.to_string(),
            })
    }

    async fn reject(&self, requeue: bool) -> Result<(), SubscribeError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| SubscribeError::Settle {
                tag: self.tag,
                reason: e.to_string(),
            })
    }
}
