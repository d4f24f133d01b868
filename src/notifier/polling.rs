//! Notifier that polls the head position of the global log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, trace};

use super::{Listener, ListenerHandle, ListenerRegistry, Notifier};
use crate::error::Result;
use crate::message::Position;

/// Reads the current head position of the store.
pub type HeadReader = Arc<dyn Fn() -> BoxFuture<'static, Result<Position>> + Send + Sync>;

/// Signals listeners whenever the head position advances.
///
/// Polls immediately after a change and sleeps `interval` between
/// unchanged reads. Read failures are logged and polling continues.
pub struct PollingNotifier {
    registry: Arc<ListenerRegistry>,
    cancel: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PollingNotifier {
    /// Spawn the polling loop.
    pub fn start(interval: Duration, read_head: HeadReader) -> Self {
        let registry = ListenerRegistry::new();
        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(poll_loop(interval, read_head, registry.clone(), cancel_rx));
        Self {
            registry,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }
}

async fn poll_loop(
    interval: Duration,
    read_head: HeadReader,
    registry: Arc<ListenerRegistry>,
    mut cancel_rx: watch::Receiver<bool>,
) {
    info!(interval = ?interval, "Polling notifier started");
    let mut previous: Position = -1;

    loop {
        if *cancel_rx.borrow() {
            break;
        }

        let head = match read_head().await {
            Ok(head) => head,
            Err(e) => {
                error!(error = %e, "Error while polling head position");
                previous
            }
        };

        if head > previous {
            trace!(head, previous, "Head position changed");
            previous = head;
            registry.notify_all();
            continue;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel_rx.changed() => {}
        }
    }

    info!("Polling notifier stopped");
}

#[async_trait]
impl Notifier for PollingNotifier {
    fn listen(&self, listener: Listener) -> Result<ListenerHandle> {
        self.registry.register(listener)
    }

    async fn dispose(&self) -> Result<()> {
        self.registry.dispose()?;
        let _ = self.cancel.send(true);
        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
        }
        Ok(())
    }
}
