//! Channel registry
//!
//! Holds the channel produced by the last successful connect. The connector
//! writes it; publishers and health checks read it on every call.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::transport::Channel;

/// Shared "current channel or absent" cell. Clones share the same slot.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    slot: Arc<RwLock<Option<Arc<dyn Channel>>>>,
}

impl ChannelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current channel
    pub fn set(&self, channel: Arc<dyn Channel>) {
        *self.slot.write() = Some(channel);
        debug!("Channel registered");
    }

    /// The current channel, or `None` if there is none or it has closed
    pub fn get(&self) -> Option<Arc<dyn Channel>> {
        self.slot
            .read()
            .as_ref()
            .filter(|channel| channel.is_open())
            .map(Arc::clone)
    }

    /// Forget the current channel
    pub fn clear(&self) {
        if self.slot.write().take().is_some() {
            debug!("Channel cleared");
        }
    }

    /// Whether a usable channel is registered
    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("available", &self.is_available())
            .finish()
    }
}
