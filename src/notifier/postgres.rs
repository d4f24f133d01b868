//! LISTEN/NOTIFY notifier for the Postgres backend.
//!
//! A dedicated connection listens on the `new_messages` channel that the
//! append function notifies. The listening connection runs as a guardian
//! actor: a lost connection or a failed keep-alive query restarts it, a
//! successful keep-alive forgives previous failures.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, error, trace, warn};

use super::{Listener, ListenerHandle, ListenerRegistry, Notifier};
use crate::error::{Result, StoreError};
use crate::utils::guardian::{Actor, Guardian, GuardianController, GuardianOptions};

/// Channel notified by every append.
pub const NOTIFICATION_CHANNEL: &str = "new_messages";

/// Push notifier backed by Postgres LISTEN/NOTIFY.
///
/// The listening connection is opened lazily on the first `listen`.
pub struct PgNotifier {
    pool: PgPool,
    keep_alive: Option<Duration>,
    options: GuardianOptions,
    registry: Arc<ListenerRegistry>,
    guardian: StdMutex<Option<Arc<Guardian>>>,
}

impl PgNotifier {
    pub fn new(pool: PgPool, keep_alive: Option<Duration>) -> Self {
        Self::with_options(pool, keep_alive, GuardianOptions::default())
    }

    pub fn with_options(pool: PgPool, keep_alive: Option<Duration>, options: GuardianOptions) -> Self {
        Self {
            pool,
            keep_alive,
            options,
            registry: ListenerRegistry::new(),
            guardian: StdMutex::new(None),
        }
    }

    fn ensure_started(&self) {
        let mut guardian = self
            .guardian
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guardian.is_some() {
            return;
        }

        let pool = self.pool.clone();
        let registry = self.registry.clone();
        let keep_alive = self.keep_alive;
        *guardian = Some(Arc::new(Guardian::start(
            move |controller| ListenerActor {
                pool: pool.clone(),
                registry: registry.clone(),
                keep_alive,
                controller,
                running: Mutex::new(None),
            },
            self.options.clone(),
        )));
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    fn listen(&self, listener: Listener) -> Result<ListenerHandle> {
        let handle = self.registry.register(listener)?;
        self.ensure_started();
        Ok(handle)
    }

    async fn dispose(&self) -> Result<()> {
        self.registry.dispose()?;
        let guardian = self
            .guardian
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(guardian) = guardian {
            guardian.dispose().await?;
        }
        Ok(())
    }
}

struct ListenerActor {
    pool: PgPool,
    registry: Arc<ListenerRegistry>,
    keep_alive: Option<Duration>,
    controller: GuardianController,
    running: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

#[async_trait]
impl Actor for ListenerActor {
    fn name(&self) -> &str {
        "pg-notifier"
    }

    async fn startup(&self) -> Result<()> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener.listen(NOTIFICATION_CHANNEL).await?;
        debug!(channel = NOTIFICATION_CHANNEL, "Listener configured");

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(listen_loop(
            listener,
            self.registry.clone(),
            self.keep_alive,
            self.controller.clone(),
            cancel_rx,
        ));
        *self.running.lock().await = Some((cancel, task));
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some((cancel, task)) = self.running.lock().await.take() {
            let _ = cancel.send(true);
            task.await
                .map_err(|e| StoreError::Notifier(format!("listener task failed: {}", e)))?;
        }
        Ok(())
    }
}

async fn next_tick(keep_alive: &mut Option<Interval>) {
    match keep_alive {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn listen_loop(
    mut listener: PgListener,
    registry: Arc<ListenerRegistry>,
    keep_alive: Option<Duration>,
    controller: GuardianController,
    mut cancel_rx: watch::Receiver<bool>,
) {
    let mut keep_alive = keep_alive.map(|every| interval_at(Instant::now() + every, every));

    loop {
        tokio::select! {
            _ = cancel_rx.changed() => break,
            received = listener.try_recv() => match received {
                Ok(Some(notification)) => {
                    trace!(channel = notification.channel(), "Notification received");
                    registry.notify_all();
                }
                Ok(None) => {
                    warn!("Listening connection lost");
                    controller.on_error("listening connection lost");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Error while receiving notifications");
                    controller.on_error(e);
                    break;
                }
            },
            _ = next_tick(&mut keep_alive) => {
                match sqlx::query("select true").execute(&mut listener).await {
                    Ok(_) => controller.reset_restart_count(),
                    Err(e) => {
                        warn!(error = %e, "Error while running keep-alive query");
                        controller.on_error(e);
                        break;
                    }
                }
            }
        }
    }

    if let Err(e) = listener.unlisten_all().await {
        debug!(error = %e, "Error while closing listener");
    }
}
