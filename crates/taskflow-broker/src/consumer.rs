//! Consumer - runs a handler for every message delivered on a queue
//!
//! Deliveries are processed one at a time per subscription. Handler errors and
//! panics are contained here: they are logged, the delivery is settled
//! according to the [`AckPolicy`], and the next message is processed.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use taskflow_types::{HandlerError, SubscribeError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connector::OnConnected;
use crate::transport::{AckPolicy, Channel, Deliveries, Delivery};

/// Processes one message body
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    /// Handle a raw payload. Return [`HandlerError::Malformed`] for messages
    /// that can never succeed and [`HandlerError::Transient`] for ones that
    /// might succeed on redelivery.
    async fn handle(&self, payload: Bytes) -> Result<(), HandlerError>;
}

/// A running subscription
pub struct Subscription {
    queue: String,
    task: JoinHandle<u64>,
}

impl Subscription {
    /// Whether the delivery loop has stopped
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the delivery loop
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Wait for the delivery loop to end, returning how many messages it
    /// processed, or `None` if it was cancelled
    pub async fn join(self) -> Option<u64> {
        self.task.await.ok()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("queue", &self.queue)
            .field("finished", &self.is_finished())
            .finish()
    }
}

/// Subscribes a handler to a named queue
pub struct Consumer {
    queue: String,
    handler: Arc<dyn DeliveryHandler>,
    policy: AckPolicy,
    /// Subscription made by the last `on_connected` call
    active: Mutex<Option<Subscription>>,
}

impl Consumer {
    /// Create an auto-acknowledging consumer
    pub fn new(queue: impl Into<String>, handler: Arc<dyn DeliveryHandler>) -> Self {
        Self {
            queue: queue.into(),
            handler,
            policy: AckPolicy::AutoAck,
            active: Mutex::new(None),
        }
    }

    /// Set the acknowledgment mode
    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Whether the subscription made on the last connect is still running
    pub fn is_subscribed(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .map(|s| !s.is_finished())
            .unwrap_or(false)
    }

    /// Start consuming on `channel`. The queue must already be asserted on
    /// the broker, so call this only after a successful connect.
    pub async fn subscribe(&self, channel: &dyn Channel) -> Result<Subscription, SubscribeError> {
        let deliveries = channel.consume(&self.queue, self.policy).await?;
        info!(queue = %self.queue, policy = ?self.policy, "Subscribed");

        let task = tokio::spawn(deliver(
            self.queue.clone(),
            Arc::clone(&self.handler),
            self.policy,
            deliveries,
        ));

        Ok(Subscription {
            queue: self.queue.clone(),
            task,
        })
    }
}

#[async_trait]
impl OnConnected for Consumer {
    async fn on_connected(&self, channel: Arc<dyn Channel>) -> Result<(), SubscribeError> {
        let subscription = self.subscribe(channel.as_ref()).await?;
        if let Some(previous) = self.active.lock().replace(subscription) {
            previous.cancel();
        }
        Ok(())
    }
}

enum Outcome {
    Handled,
    Failed(HandlerError),
    Panicked,
}

/// Delivery loop for one subscription
async fn deliver(
    queue: String,
    handler: Arc<dyn DeliveryHandler>,
    policy: AckPolicy,
    mut deliveries: Deliveries,
) -> u64 {
    let mut processed = 0;

    while let Some(delivery) = deliveries.next().await {
        let outcome = invoke(&handler, delivery.payload().clone()).await;
        settle(&queue, policy, &delivery, outcome).await;
        processed += 1;
    }

    info!(queue = %queue, processed, "Delivery stream ended");
    processed
}

/// Run the handler as its own task so a panic is reported instead of
/// unwinding through the delivery loop
async fn invoke(handler: &Arc<dyn DeliveryHandler>, payload: Bytes) -> Outcome {
    let handler = Arc::clone(handler);
    match tokio::spawn(async move { handler.handle(payload).await }).await {
        Ok(Ok(())) => Outcome::Handled,
        Ok(Err(err)) => Outcome::Failed(err),
        Err(_) => Outcome::Panicked,
    }
}

async fn settle(queue: &str, policy: AckPolicy, delivery: &Delivery, outcome: Outcome) {
    let tag = delivery.tag();
    let manual = policy == AckPolicy::ManualAck;

    let result = match outcome {
        Outcome::Handled => {
            debug!(queue = %queue, tag, "Message handled");
            delivery.ack().await
        }
        Outcome::Failed(HandlerError::Malformed(reason)) => {
            warn!(queue = %queue, tag, reason = %reason, "Discarding malformed message");
            delivery.reject(false).await
        }
        Outcome::Failed(HandlerError::Transient(reason)) => {
            warn!(queue = %queue, tag, reason = %reason, requeue = manual, "Handler failed");
            delivery.reject(true).await
        }
        Outcome::Panicked => {
            // A second panic on the same message drops it
            let requeue = manual && !delivery.is_redelivered();
            error!(queue = %queue, tag, requeue, "Handler panicked");
            delivery.reject(requeue).await
        }
    };

    if let Err(e) = result {
        warn!(queue = %queue, tag, error = %e, "Failed to settle delivery");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBroker;
    use crate::transport::Transport;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use taskflow_types::{NewTask, Task};
    use tokio::sync::mpsc;

    /// Forwards every well-formed payload to the test
    struct Probe {
        seen: mpsc::UnboundedSender<Bytes>,
        transient_failures: AtomicU32,
    }

    impl Probe {
        fn new(transient_failures: u32) -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
            let (seen, rx) = mpsc::unbounded_channel();
            let probe = Arc::new(Self {
                seen,
                transient_failures: AtomicU32::new(transient_failures),
            });
            (probe, rx)
        }
    }

    #[async_trait]
    impl DeliveryHandler for Probe {
        async fn handle(&self, payload: Bytes) -> Result<(), HandlerError> {
            if payload.as_ref() == b"boom" {
                panic!("handler exploded");
            }
            if serde_json::from_slice::<serde_json::Value>(&payload).is_err() {
                return Err(HandlerError::Malformed("not json".into()));
            }
            let _ = self.seen.send(payload);
            let failed = self
                .transient_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(HandlerError::Transient("downstream busy".into()));
            }
            Ok(())
        }
    }

    async fn declared_channel(broker: &MemoryBroker, queue: &str) -> Arc<dyn Channel> {
        let channel = broker.dial().await.unwrap().create_channel().await.unwrap();
        channel.assert_queue(queue).await.unwrap();
        channel
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Bytes {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for delivery")
            .expect("probe dropped")
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_published_record_round_trips() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "TaskCreated").await;
        let (probe, mut rx) = Probe::new(0);

        let task = Task::new(NewTask {
            title: "Round trip".into(),
            description: "through the broker".into(),
            user_id: "u-7".into(),
        });
        channel
            .send_to_queue("TaskCreated", serde_json::to_vec(&task).unwrap().into())
            .await
            .unwrap();

        let consumer = Consumer::new("TaskCreated", probe);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        let received: Task = serde_json::from_slice(&recv(&mut rx).await).unwrap();
        assert_eq!(received, task);
    }

    #[tokio::test]
    async fn test_malformed_message_does_not_stop_delivery() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(0);

        let consumer = Consumer::new("q", probe);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from("{not json")).await.unwrap();
        channel.send_to_queue("q", Bytes::from(r#"{"title":"ok"}"#)).await.unwrap();

        assert_eq!(recv(&mut rx).await, r#"{"title":"ok"}"#);
    }

    #[tokio::test]
    async fn test_panicking_handler_does_not_stop_delivery() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(0);

        let consumer = Consumer::new("q", probe);
        let subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from("boom")).await.unwrap();
        channel.send_to_queue("q", Bytes::from("[1]")).await.unwrap();

        assert_eq!(recv(&mut rx).await, "[1]");
        assert!(!subscription.is_finished());
    }

    #[tokio::test]
    async fn test_sequential_publishes_are_all_delivered() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(0);

        let consumer = Consumer::new("q", probe);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from(r#""A""#)).await.unwrap();
        channel.send_to_queue("q", Bytes::from(r#""B""#)).await.unwrap();

        let mut seen = vec![recv(&mut rx).await, recv(&mut rx).await];
        seen.sort();
        assert_eq!(seen, vec![Bytes::from(r#""A""#), Bytes::from(r#""B""#)]);
    }

    #[tokio::test]
    async fn test_manual_ack_redelivers_transient_failure() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(1);

        let consumer = Consumer::new("q", probe).with_ack_policy(AckPolicy::ManualAck);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from("{}")).await.unwrap();

        assert_eq!(recv(&mut rx).await, "{}");
        assert_eq!(recv(&mut rx).await, "{}");
        eventually(|| broker.unacked("q") == 0 && broker.queue_depth("q") == 0).await;
    }

    #[tokio::test]
    async fn test_auto_ack_does_not_redeliver_failure() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(1);

        let consumer = Consumer::new("q", probe);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from(r#""first""#)).await.unwrap();
        channel.send_to_queue("q", Bytes::from(r#""second""#)).await.unwrap();

        // The failed first message is gone; the next one is the second
        assert_eq!(recv(&mut rx).await, r#""first""#);
        assert_eq!(recv(&mut rx).await, r#""second""#);
        assert_eq!(broker.queue_depth("q"), 0);
    }

    #[tokio::test]
    async fn test_manual_ack_discards_malformed() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(0);

        let consumer = Consumer::new("q", probe).with_ack_policy(AckPolicy::ManualAck);
        let _subscription = consumer.subscribe(channel.as_ref()).await.unwrap();

        channel.send_to_queue("q", Bytes::from("garbage")).await.unwrap();
        channel.send_to_queue("q", Bytes::from("{}")).await.unwrap();

        assert_eq!(recv(&mut rx).await, "{}");
        eventually(|| broker.unacked("q") == 0 && broker.queue_depth("q") == 0).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_subscription_ends_when_connection_drops() {
        let broker = MemoryBroker::new();
        let channel = declared_channel(&broker, "q").await;
        let (probe, mut rx) = Probe::new(0);

        let consumer = Consumer::new("q", probe);
        let subscription = consumer.subscribe(channel.as_ref()).await.unwrap();
        channel.send_to_queue("q", Bytes::from("1")).await.unwrap();
        recv(&mut rx).await;

        broker.drop_connections();
        let processed = tokio::time::timeout(Duration::from_secs(2), subscription.join())
            .await
            .unwrap();
        assert_eq!(processed, Some(1));
    }

    #[tokio::test]
    async fn test_subscribe_requires_declared_queue() {
        let broker = MemoryBroker::new();
        let channel = broker.dial().await.unwrap().create_channel().await.unwrap();
        let (probe, _rx) = Probe::new(0);

        let consumer = Consumer::new("never-declared", probe);
        let err = consumer.subscribe(channel.as_ref()).await.unwrap_err();
        assert!(matches!(err, SubscribeError::Consume { .. }));
        assert!(!consumer.is_subscribed());
    }
}
