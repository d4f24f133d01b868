//! Notifier driven directly by the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use super::{Listener, ListenerHandle, ListenerRegistry, Notifier};
use crate::error::Result;

/// Notifier the in-memory backend invokes after every successful append.
#[derive(Clone, Default)]
pub struct InMemoryNotifier {
    registry: Arc<ListenerRegistry>,
}

impl InMemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal all listeners. A no-op once disposed.
    pub fn invoke(&self) {
        trace!(listeners = self.registry.len(), "Invoking in-memory listeners");
        self.registry.notify_all();
    }

    pub fn listener_count(&self) -> usize {
        self.registry.len()
    }
}

#[async_trait]
impl Notifier for InMemoryNotifier {
    fn listen(&self, listener: Listener) -> Result<ListenerHandle> {
        self.registry.register(listener)
    }

    async fn dispose(&self) -> Result<()> {
        self.registry.dispose()
    }
}
