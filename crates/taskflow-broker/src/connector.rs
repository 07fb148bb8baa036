//! Connector - owns the broker connection and its retry policy
//!
//! A connect attempt is dial, open channel, assert queue, then run every
//! [`OnConnected`] hook. Attempts are retried under a [`RetryPolicy`]; on
//! success the channel is published to the [`ChannelRegistry`]. When
//! supervised, a lost connection clears the registry and triggers a fresh
//! round of attempts.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use taskflow_types::{ConnectionError, SubscribeError, TASK_CREATED};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::registry::ChannelRegistry;
use crate::retry::{retry, Exhausted, RetryPolicy};
use crate::transport::{Channel, Connection, Transport};

/// Work to run each time a channel becomes available, e.g. registering a
/// consumer
#[async_trait]
pub trait OnConnected: Send + Sync {
    async fn on_connected(&self, channel: Arc<dyn Channel>) -> Result<(), SubscribeError>;
}

/// Connector configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorConfig {
    /// Durable queue asserted on every connect
    pub queue: String,
    /// Attempt budget and delay for each round of connect attempts
    pub retry: RetryPolicy,
    /// Reconnect after an established connection is lost
    pub reconnect: bool,
}

impl ConnectorConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_reconnect(mut self, reconnect: bool) -> Self {
        self.reconnect = reconnect;
        self
    }
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            queue: TASK_CREATED.to_string(),
            retry: RetryPolicy::default(),
            reconnect: true,
        }
    }
}

/// Establishes and optionally supervises the broker connection
pub struct Connector {
    transport: Arc<dyn Transport>,
    registry: ChannelRegistry,
    config: ConnectorConfig,
    hooks: Vec<Arc<dyn OnConnected>>,
    connection: Mutex<Option<Arc<dyn Connection>>>,
}

impl Connector {
    /// Create a connector that stores its channel in `registry`
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: ChannelRegistry,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            transport,
            registry,
            config,
            hooks: Vec::new(),
            connection: Mutex::new(None),
        }
    }

    /// Run `hook` after every successful connect
    pub fn on_connected(mut self, hook: Arc<dyn OnConnected>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Whether the last established connection is still up
    pub fn is_connected(&self) -> bool {
        self.connection
            .lock()
            .as_ref()
            .map(|c| c.is_connected())
            .unwrap_or(false)
    }

    /// Run one round of connect attempts.
    ///
    /// On success the channel is registered and the hooks have run. On
    /// failure the registry is left as it was.
    pub async fn connect(&self) -> Result<Arc<dyn Channel>, ConnectionError> {
        let (_, channel) = self.establish().await?;
        Ok(channel)
    }

    /// Connect, then keep the connection supervised until reconnecting is
    /// disabled or a round of attempts is exhausted
    pub async fn run(&self) -> Result<(), ConnectionError> {
        loop {
            let (connection, _) = self.establish().await?;
            connection.closed().await;

            self.registry.clear();
            if !self.config.reconnect {
                warn!(addr = %self.transport.address(), "Broker connection lost, reconnect disabled");
                return Ok(());
            }
            warn!(addr = %self.transport.address(), "Broker connection lost, reconnecting");
        }
    }

    /// Run [`Connector::run`] in the background
    pub fn spawn(self) -> JoinHandle<Result<(), ConnectionError>> {
        tokio::spawn(async move { self.run().await })
    }

    async fn establish(&self) -> Result<(Arc<dyn Connection>, Arc<dyn Channel>), ConnectionError> {
        let transport = &self.transport;
        let queue = self.config.queue.as_str();

        // Hooks are part of an attempt: a failed subscription is retried like a failed dial
        let result = retry(self.config.retry, |attempt| async move {
            debug!(attempt, addr = %transport.address(), "Connecting to broker");
            let connection = transport.dial().await?;
            let channel = connection.create_channel().await?;
            channel.assert_queue(queue).await?;
            self.run_hooks(&channel)
                .await
                .map_err(|e| ConnectionError::Setup(e.to_string()))?;
            Ok::<_, ConnectionError>((connection, channel))
        })
        .await;

        match result {
            Ok((connection, channel)) => {
                info!(addr = %transport.address(), queue = %queue, "Connected to broker");
                self.registry.set(Arc::clone(&channel));
                *self.connection.lock() = Some(Arc::clone(&connection));
                Ok((connection, channel))
            }
            Err(Exhausted { attempts, last }) => {
                error!(
                    addr = %transport.address(),
                    attempts,
                    error = %last,
                    "Could not connect to broker, giving up"
                );
                Err(ConnectionError::RetriesExhausted {
                    attempts,
                    last: Box::new(last),
                })
            }
        }
    }

    async fn run_hooks(&self, channel: &Arc<dyn Channel>) -> Result<(), SubscribeError> {
        for hook in &self.hooks {
            hook.on_connected(Arc::clone(channel)).await.map_err(|e| {
                warn!(queue = %self.config.queue, error = %e, "Post-connect hook failed");
                e
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consumer::{Consumer, DeliveryHandler};
    use crate::memory::MemoryBroker;
    use crate::publisher::Publisher;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use taskflow_types::HandlerError;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    #[derive(Default)]
    struct CountingHook {
        calls: AtomicU32,
    }

    #[async_trait]
    impl OnConnected for CountingHook {
        async fn on_connected(&self, _channel: Arc<dyn Channel>) -> Result<(), SubscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Fails its first `failures` calls
    struct FlakyHook {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyHook {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl OnConnected for FlakyHook {
        async fn on_connected(&self, _channel: Arc<dyn Channel>) -> Result<(), SubscribeError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                return Err(SubscribeError::Consume {
                    queue: TASK_CREATED.to_string(),
                    reason: "consumer refused".to_string(),
                });
            }
            Ok(())
        }
    }

    struct Forward(mpsc::UnboundedSender<Bytes>);

    #[async_trait]
    impl DeliveryHandler for Forward {
        async fn handle(&self, payload: Bytes) -> Result<(), HandlerError> {
            let _ = self.0.send(payload);
            Ok(())
        }
    }

    fn connector(broker: &MemoryBroker, attempts: u32, delay_ms: u64) -> Connector {
        let config = ConnectorConfig::new(TASK_CREATED)
            .with_retry(RetryPolicy::from_millis(attempts, delay_ms));
        Connector::new(Arc::new(broker.clone()), ChannelRegistry::new(), config)
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_broker_up_on_third_attempt() {
        let broker = MemoryBroker::new();
        broker.fail_next_dials(2);
        let connector = connector(&broker, 5, 100);
        let start = Instant::now();

        connector.connect().await.unwrap();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(300));
        assert_eq!(broker.dial_attempts(), 3);
        assert_eq!(broker.queue_asserts(TASK_CREATED), 1);
        assert!(connector.registry().is_available());
        assert!(connector.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reachable_on_any_attempt_within_budget() {
        for reachable_on in 1..=5 {
            let broker = MemoryBroker::new();
            broker.fail_next_dials(reachable_on - 1);
            let connector = connector(&broker, 5, 50);

            assert!(connector.connect().await.is_ok(), "attempt {reachable_on}");
            assert!(connector.registry().is_available());
            assert_eq!(broker.dial_attempts(), reachable_on);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_broker_leaves_registry_absent() {
        let broker = MemoryBroker::new();
        broker.set_reachable(false);
        let connector = connector(&broker, 5, 100);

        let Err(err) = connector.connect().await else {
            panic!("connect should fail");
        };

        match err {
            ConnectionError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 5);
                assert!(matches!(*last, ConnectionError::Dial { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(broker.dial_attempts(), 5);
        assert!(!connector.registry().is_available());
        assert!(!connector.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_assert_failure_is_retried() {
        let broker = MemoryBroker::new();
        broker.fail_next_asserts(1);
        let connector = connector(&broker, 3, 100);

        connector.connect().await.unwrap();

        assert_eq!(broker.dial_attempts(), 2);
        assert_eq!(broker.queue_asserts(TASK_CREATED), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hooks_run_once_per_connect() {
        let broker = MemoryBroker::new();
        broker.fail_next_dials(1);
        let hook = Arc::new(CountingHook::default());
        let connector = connector(&broker, 5, 100).on_connected(hook.clone());

        connector.connect().await.unwrap();
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_hook_is_retried_as_an_attempt() {
        let broker = MemoryBroker::new();
        let hook = Arc::new(FlakyHook::new(1));
        let connector = connector(&broker, 3, 100).on_connected(hook.clone());

        connector.connect().await.unwrap();

        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
        assert_eq!(broker.dial_attempts(), 2);
        assert!(connector.registry().is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hook_failing_every_attempt_fails_connect() {
        let broker = MemoryBroker::new();
        let hook = Arc::new(FlakyHook::new(u32::MAX));
        let connector = connector(&broker, 3, 100).on_connected(hook.clone());

        let Err(err) = connector.connect().await else {
            panic!("connect should fail");
        };

        match err {
            ConnectionError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, ConnectionError::Setup(_)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(hook.calls.load(Ordering::SeqCst), 3);
        assert!(!connector.registry().is_available());
        assert!(!connector.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_reconnects_after_drop() {
        let broker = MemoryBroker::new();
        let hook = Arc::new(CountingHook::default());
        let connector = connector(&broker, 5, 100).on_connected(hook.clone());
        let registry = connector.registry().clone();
        let handle = connector.spawn();

        eventually(|| registry.is_available()).await;
        assert_eq!(hook.calls.load(Ordering::SeqCst), 1);

        broker.set_reachable(false);
        broker.drop_connections();
        eventually(|| !registry.is_available() && broker.dial_attempts() >= 2).await;

        broker.set_reachable(true);
        eventually(|| registry.is_available()).await;
        assert_eq!(hook.calls.load(Ordering::SeqCst), 2);
        assert_eq!(broker.queue_asserts(TASK_CREATED), 2);
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_supervisor_gives_up_when_reconnect_exhausted() {
        let broker = MemoryBroker::new();
        let connector = connector(&broker, 3, 100);
        let registry = connector.registry().clone();
        let handle = connector.spawn();

        eventually(|| registry.is_available()).await;
        broker.set_reachable(false);
        broker.drop_connections();

        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(ConnectionError::RetriesExhausted { attempts: 3, .. })
        ));
        assert!(!registry.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_disabled_stops_after_drop() {
        let broker = MemoryBroker::new();
        let config = ConnectorConfig::default()
            .with_retry(RetryPolicy::from_millis(5, 100))
            .with_reconnect(false);
        let registry = ChannelRegistry::new();
        let handle = Connector::new(Arc::new(broker.clone()), registry.clone(), config).spawn();

        eventually(|| registry.is_available()).await;
        broker.drop_connections();

        assert!(handle.await.unwrap().is_ok());
        assert!(!registry.is_available());
        assert_eq!(broker.dial_attempts(), 1);
    }

    #[tokio::test]
    async fn test_consumer_registered_on_connect_receives_events() {
        let broker = MemoryBroker::new();

        // Producer side connects first; the queue buffers until the consumer attaches
        let producer = connector(&broker, 5, 10);
        producer.connect().await.unwrap();
        let publisher = Publisher::new(producer.registry().clone());
        publisher.publish(TASK_CREATED, r#"{"n":"A"}"#).await.unwrap();
        publisher.publish(TASK_CREATED, r#"{"n":"B"}"#).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(Consumer::new(TASK_CREATED, Arc::new(Forward(tx))));
        let registry = ChannelRegistry::new();
        let config = ConnectorConfig::default().with_retry(RetryPolicy::from_millis(5, 10));
        let handle = Connector::new(Arc::new(broker.clone()), registry.clone(), config)
            .on_connected(consumer.clone())
            .spawn();

        let mut seen = Vec::new();
        for _ in 0..2 {
            let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            seen.push(payload);
        }
        seen.sort();
        assert_eq!(seen, vec![Bytes::from(r#"{"n":"A"}"#), Bytes::from(r#"{"n":"B"}"#)]);
        assert!(consumer.is_subscribed());

        // After a broker-side drop both sides reconnect and delivery resumes
        broker.drop_connections();
        eventually(|| registry.is_available()).await;
        producer.connect().await.unwrap();
        publisher.publish(TASK_CREATED, r#"{"n":"C"}"#).await.unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, r#"{"n":"C"}"#);
        handle.abort();
    }
}
