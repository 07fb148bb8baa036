//! In-process broker
//!
//! Implements the transport traits without a network. Queues buffer messages
//! until a consumer attaches, manual-ack deliveries are requeued when they are
//! rejected or dropped unsettled, and closing a session ends its
//! subscriptions. Failure injection hooks let tests simulate an unreachable
//! broker or a broker-side disconnect.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use taskflow_types::{ConnectionError, PublishError, SubscribeError};
use tokio::sync::{mpsc, watch, Notify};
use tracing::{debug, info};

use crate::transport::{
    AckPolicy, Acker, Channel, Connection, Deliveries, Delivery, Transport,
};

const ADDRESS: &str = "memory://local";

/// A message waiting in a queue
struct Stored {
    payload: Bytes,
    redelivered: bool,
}

/// Internal queue data structure
struct QueueData {
    /// Messages ready for delivery
    messages: Mutex<VecDeque<Stored>>,
    /// Delivered under manual ack and not yet settled
    unacked: AtomicUsize,
    /// Signalled whenever a message becomes ready
    ready: Notify,
}

impl QueueData {
    fn new() -> Self {
        Self {
            messages: Mutex::new(VecDeque::new()),
            unacked: AtomicUsize::new(0),
            ready: Notify::new(),
        }
    }

    fn push_back(&self, stored: Stored) {
        self.messages.lock().push_back(stored);
        self.ready.notify_one();
    }

    fn push_front(&self, stored: Stored) {
        self.messages.lock().push_front(stored);
        self.ready.notify_one();
    }

    fn pop(&self) -> Option<Stored> {
        self.messages.lock().pop_front()
    }
}

/// One dialed connection; its channels close with it
struct Session {
    open: watch::Sender<bool>,
}

impl Session {
    fn new() -> Self {
        let (open, _) = watch::channel(true);
        Self { open }
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    fn close(&self) {
        self.open.send_replace(false);
    }
}

/// Resolves once the session behind `rx` is closed
async fn session_closed(mut rx: watch::Receiver<bool>) {
    loop {
        if !*rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

struct BrokerState {
    queues: DashMap<String, Arc<QueueData>>,
    sessions: Mutex<Vec<Arc<Session>>>,
    reachable: AtomicBool,
    failing_dials: AtomicU32,
    failing_asserts: AtomicU32,
    dial_attempts: AtomicU32,
    asserts: DashMap<String, u32>,
    next_tag: AtomicU64,
}

/// Decrement `counter` if it is positive; true if it was
fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// In-process broker. Cloning yields another handle to the same broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create a reachable broker with no queues
    pub fn new() -> Self {
        info!("Initializing in-memory broker");
        Self {
            state: Arc::new(BrokerState {
                queues: DashMap::new(),
                sessions: Mutex::new(Vec::new()),
                reachable: AtomicBool::new(true),
                failing_dials: AtomicU32::new(0),
                failing_asserts: AtomicU32::new(0),
                dial_attempts: AtomicU32::new(0),
                asserts: DashMap::new(),
                next_tag: AtomicU64::new(0),
            }),
        }
    }

    /// Refuse the next `n` dials
    pub fn fail_next_dials(&self, n: u32) {
        self.state.failing_dials.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` queue declarations
    pub fn fail_next_asserts(&self, n: u32) {
        self.state.failing_asserts.store(n, Ordering::SeqCst);
    }

    /// Refuse every dial while `false`
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Dials attempted so far, successful or not
    pub fn dial_attempts(&self) -> u32 {
        self.state.dial_attempts.load(Ordering::SeqCst)
    }

    /// Successful declarations of `queue`
    pub fn queue_asserts(&self, queue: &str) -> u32 {
        self.state.asserts.get(queue).map(|n| *n).unwrap_or(0)
    }

    /// Messages ready for delivery on `queue`
    pub fn queue_depth(&self, queue: &str) -> usize {
        self.queue(queue).map(|q| q.messages.lock().len()).unwrap_or(0)
    }

    /// Manual-ack deliveries on `queue` not yet settled
    pub fn unacked(&self, queue: &str) -> usize {
        self.queue(queue)
            .map(|q| q.unacked.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Open connections
    pub fn connection_count(&self) -> usize {
        let mut sessions = self.state.sessions.lock();
        sessions.retain(|s| s.is_open());
        sessions.len()
    }

    /// Close every open connection from the broker side
    pub fn drop_connections(&self) {
        let sessions: Vec<Arc<Session>> = self.state.sessions.lock().drain(..).collect();
        for session in &sessions {
            session.close();
        }
        info!(count = sessions.len(), "Dropped all connections");
    }

    fn queue(&self, name: &str) -> Option<Arc<QueueData>> {
        self.state.queues.get(name).map(|q| Arc::clone(q.value()))
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryBroker {
    fn address(&self) -> &str {
        ADDRESS
    }

    async fn dial(&self) -> Result<Arc<dyn Connection>, ConnectionError> {
        self.state.dial_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.state.reachable.load(Ordering::SeqCst) || take_one(&self.state.failing_dials) {
            return Err(ConnectionError::Dial {
                addr: ADDRESS.to_string(),
                reason: "connection refused".to_string(),
            });
        }

        let session = Arc::new(Session::new());
        {
            let mut sessions = self.state.sessions.lock();
            sessions.retain(|s| s.is_open());
            sessions.push(Arc::clone(&session));
        }
        debug!("Connection opened");

        Ok(Arc::new(MemoryConnection {
            broker: self.clone(),
            session,
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
    session: Arc<Session>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn create_channel(&self) -> Result<Arc<dyn Channel>, ConnectionError> {
        if !self.session.is_open() {
            return Err(ConnectionError::Channel("connection closed".to_string()));
        }
        Ok(Arc::new(MemoryChannel {
            broker: self.broker.clone(),
            session: Arc::clone(&self.session),
        }))
    }

    fn is_connected(&self) -> bool {
        self.session.is_open()
    }

    async fn closed(&self) {
        session_closed(self.session.open.subscribe()).await
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    session: Arc<Session>,
}

#[async_trait]
impl Channel for MemoryChannel {
    async fn assert_queue(&self, queue: &str) -> Result<(), ConnectionError> {
        let state = &self.broker.state;
        if !self.session.is_open() || take_one(&state.failing_asserts) {
            return Err(ConnectionError::QueueAssert {
                queue: queue.to_string(),
                reason: "channel closed".to_string(),
            });
        }

        state
            .queues
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(QueueData::new()));
        *state.asserts.entry(queue.to_string()).or_insert(0) += 1;

        debug!(queue = %queue, "Queue asserted");
        Ok(())
    }

    async fn send_to_queue(&self, queue: &str, payload: Bytes) -> Result<(), PublishError> {
        if !self.session.is_open() {
            return Err(PublishError::Broker("channel closed".to_string()));
        }
        let queue_data = self
            .broker
            .queue(queue)
            .ok_or_else(|| PublishError::Broker(format!("no queue named {queue}")))?;

        queue_data.push_back(Stored {
            payload,
            redelivered: false,
        });
        Ok(())
    }

    async fn consume(&self, queue: &str, policy: AckPolicy) -> Result<Deliveries, SubscribeError> {
        if !self.session.is_open() {
            return Err(SubscribeError::ChannelClosed);
        }
        let queue_data = self.broker.queue(queue).ok_or_else(|| SubscribeError::Consume {
            queue: queue.to_string(),
            reason: "queue not declared".to_string(),
        })?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(dispatch(
            self.broker.clone(),
            queue_data,
            Arc::clone(&self.session),
            policy,
            tx,
        ));

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|delivery| (delivery, rx))
        });
        Ok(stream.boxed())
    }

    fn is_open(&self) -> bool {
        self.session.is_open()
    }
}

/// Move messages from the queue to one subscriber, one at a time, until the
/// session closes or the subscriber goes away
async fn dispatch(
    broker: MemoryBroker,
    queue: Arc<QueueData>,
    session: Arc<Session>,
    policy: AckPolicy,
    tx: mpsc::Sender<Delivery>,
) {
    let closed = session_closed(session.open.subscribe());
    tokio::pin!(closed);

    loop {
        let permit = tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = &mut closed => break,
        };

        let stored = loop {
            if let Some(stored) = queue.pop() {
                break Some(stored);
            }
            tokio::select! {
                _ = queue.ready.notified() => {}
                _ = &mut closed => break None,
                _ = tx.closed() => break None,
            }
        };
        let Some(stored) = stored else { break };

        let tag = broker.state.next_tag.fetch_add(1, Ordering::SeqCst) + 1;
        let delivery = Delivery::new(stored.payload.clone(), tag, stored.redelivered);
        let delivery = match policy {
            AckPolicy::AutoAck => delivery,
            AckPolicy::ManualAck => {
                queue.unacked.fetch_add(1, Ordering::SeqCst);
                delivery.with_acker(MemoryAcker {
                    tag,
                    queue: Arc::clone(&queue),
                    pending: Mutex::new(Some(stored)),
                })
            }
        };
        permit.send(delivery);
    }

    debug!("Dispatcher stopped");
}

/// Settles one manual-ack delivery. Dropping it unsettled requeues the message.
struct MemoryAcker {
    tag: u64,
    queue: Arc<QueueData>,
    pending: Mutex<Option<Stored>>,
}

impl MemoryAcker {
    fn settle(&self) -> Result<Stored, SubscribeError> {
        let stored = self.pending.lock().take().ok_or_else(|| SubscribeError::Settle {
            tag: self.tag,
            reason: "already settled".to_string(),
        })?;
        self.queue.unacked.fetch_sub(1, Ordering::SeqCst);
        Ok(stored)
    }

    fn requeue(&self, stored: Stored) {
        self.queue.push_front(Stored {
            payload: stored.payload,
            redelivered: true,
        });
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(&self) -> Result<(), SubscribeError> {
        self.settle().map(|_| ())
    }

    async fn reject(&self, requeue: bool) -> Result<(), SubscribeError> {
        let stored = self.settle()?;
        if requeue {
            self.requeue(stored);
        }
        Ok(())
    }
}

impl Drop for MemoryAcker {
    fn drop(&mut self) {
        if let Ok(stored) = self.settle() {
            self.requeue(stored);
        }
    }
}
