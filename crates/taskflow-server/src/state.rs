//! Shared application state

use std::sync::Arc;

use taskflow_broker::{ChannelRegistry, Publisher};
use taskflow_storage::{MemoryStore, TaskStore, UserStore};

use crate::config::Service;

/// Broker access for request handlers
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    pub registry: ChannelRegistry,
    pub publisher: Publisher,
    /// Queue events are published to
    pub queue: String,
}

impl BrokerHandle {
    pub fn new(registry: ChannelRegistry, queue: impl Into<String>) -> Self {
        Self {
            publisher: Publisher::new(registry.clone()),
            registry,
            queue: queue.into(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: Service,
    pub users: Arc<dyn UserStore>,
    pub tasks: Arc<dyn TaskStore>,
    /// `None` for services that never talk to the broker
    pub broker: Option<BrokerHandle>,
}

impl AppState {
    /// State backed by a fresh in-memory store
    pub fn new(service: Service) -> Self {
        Self::with_store(service, Arc::new(MemoryStore::new()))
    }

    /// State backed by `store`
    pub fn with_store<S>(service: Service, store: Arc<S>) -> Self
    where
        S: TaskStore + UserStore + 'static,
    {
        Self {
            service,
            users: store.clone(),
            tasks: store,
            broker: None,
        }
    }

    pub fn with_broker(mut self, broker: BrokerHandle) -> Self {
        self.broker = Some(broker);
        self
    }
}
