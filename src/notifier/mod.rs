//! Change notification for subscriptions.
//!
//! A notifier signals "something was appended" without saying what.
//! Subscriptions listen and re-pull from their cursor on every signal.
//!
//! # Implementations
//!
//! - [`InMemoryNotifier`]: invoked directly by the in-memory backend
//! - [`PollingNotifier`]: compares the head position on an interval
//! - `PgNotifier` (postgres feature): LISTEN/NOTIFY, supervised by a guardian

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;

use crate::error::{Result, StoreError};

pub mod memory;
pub mod polling;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryNotifier;
pub use polling::PollingNotifier;

#[cfg(feature = "postgres")]
pub use postgres::PgNotifier;

/// Callback invoked on every change signal.
pub type Listener = Arc<dyn Fn() + Send + Sync>;

/// Abstract change signal.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Register a listener. Dropping the returned handle unregisters it.
    fn listen(&self, listener: Listener) -> Result<ListenerHandle>;

    /// Stop signalling and release resources. A second call fails.
    async fn dispose(&self) -> Result<()>;
}

/// Registration of a listener; unregisters on drop.
pub struct ListenerHandle {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl ListenerHandle {
    pub fn unlisten(self) {}
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

/// Listener bookkeeping shared by all notifier implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<u64, Listener>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(self: &Arc<Self>, listener: Listener) -> Result<ListenerHandle> {
        if self.is_disposed() {
            return Err(StoreError::Disposed(
                "the notifier has been disposed".to_string(),
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.lock().insert(id, listener);
        Ok(ListenerHandle {
            id,
            registry: Arc::downgrade(self),
        })
    }

    fn remove(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Invoke every registered listener once.
    pub fn notify_all(&self) {
        let listeners: Vec<Listener> = self.lock().values().cloned().collect();
        for listener in listeners {
            listener();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark disposed and drop all listeners. Fails if already disposed.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed(
                "the notifier has already been disposed".to_string(),
            ));
        }
        self.lock().clear();
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Listener>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
