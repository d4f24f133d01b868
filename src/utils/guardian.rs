//! Supervisor that restarts a failing background actor a bounded number of times.
//!
//! The guardian spawns an actor through a factory that receives a
//! [`GuardianController`]. The actor reports failures through the controller;
//! the guardian then shuts the actor down and spawns a fresh one. Restart
//! cycles are serialized by a single supervisor task. Errors reported by an
//! actor that has already been replaced are ignored.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{Result, StoreError};

/// Default number of restarts before the guardian gives up.
pub const DEFAULT_MAX_RESTARTS: u32 = 10;

/// A supervised background actor.
#[async_trait]
pub trait Actor: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Bring the actor up. An error counts as a failure and triggers a restart.
    async fn startup(&self) -> Result<()>;

    /// Tear the actor down. Called even when startup failed.
    async fn shutdown(&self) -> Result<()>;
}

/// Callback invoked once restarts are exhausted.
pub type ExhaustedCallback = Arc<dyn Fn() + Send + Sync>;

/// Guardian options.
#[derive(Clone)]
pub struct GuardianOptions {
    pub max_restarts: u32,
    pub on_restarts_exhausted: Option<ExhaustedCallback>,
}

impl Default for GuardianOptions {
    fn default() -> Self {
        Self {
            max_restarts: DEFAULT_MAX_RESTARTS,
            on_restarts_exhausted: None,
        }
    }
}

enum Control {
    Error { generation: u64, error: String },
    ResetRestartCount,
    Dispose(oneshot::Sender<()>),
}

/// Handle given to each actor incarnation for reporting back to the guardian.
#[derive(Clone)]
pub struct GuardianController {
    generation: u64,
    tx: mpsc::UnboundedSender<Control>,
}

impl GuardianController {
    /// Report a failure; the guardian restarts the actor.
    pub fn on_error(&self, error: impl std::fmt::Display) {
        let _ = self.tx.send(Control::Error {
            generation: self.generation,
            error: error.to_string(),
        });
    }

    /// Forgive previous failures, e.g. after a successful health check.
    pub fn reset_restart_count(&self) {
        let _ = self.tx.send(Control::ResetRestartCount);
    }
}

/// Running guardian.
pub struct Guardian {
    tx: mpsc::UnboundedSender<Control>,
    restart_count: Arc<AtomicU32>,
    disposed: AtomicBool,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl Guardian {
    /// Spawn the first actor and start supervising it.
    pub fn start<F, A>(spawn: F, options: GuardianOptions) -> Self
    where
        F: Fn(GuardianController) -> A + Send + Sync + 'static,
        A: Actor + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let restart_count = Arc::new(AtomicU32::new(0));
        let supervisor = Supervisor {
            spawn: Box::new(move |controller| Box::new(spawn(controller)) as Box<dyn Actor>),
            options,
            tx: tx.clone(),
            restart_count: restart_count.clone(),
            generation: 0,
            actor: None,
            exhausted: false,
        };
        let handle = tokio::spawn(supervisor.run(rx));

        Self {
            tx,
            restart_count,
            disposed: AtomicBool::new(false),
            supervisor: Mutex::new(Some(handle)),
        }
    }

    /// Restarts performed since start or the last reset.
    pub fn restart_count(&self) -> u32 {
        self.restart_count.load(Ordering::SeqCst)
    }

    /// Shut down the running actor and stop supervising.
    pub async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed(
                "the guardian has already been disposed".to_string(),
            ));
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(Control::Dispose(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
        if let Some(handle) = self.supervisor.lock().await.take() {
            let _ = handle.await;
        }
        Ok(())
    }
}

type SpawnFn = Box<dyn Fn(GuardianController) -> Box<dyn Actor> + Send + Sync>;

struct Supervisor {
    spawn: SpawnFn,
    options: GuardianOptions,
    tx: mpsc::UnboundedSender<Control>,
    restart_count: Arc<AtomicU32>,
    generation: u64,
    actor: Option<Box<dyn Actor>>,
    exhausted: bool,
}

impl Supervisor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Control>) {
        self.spawn_and_start().await;

        while let Some(control) = rx.recv().await {
            match control {
                Control::Error { generation, error } => {
                    if self.exhausted || generation != self.generation {
                        continue;
                    }
                    error!(actor = %self.actor_name(), error = %error, "Actor failed, restarting");
                    self.restart().await;
                }
                Control::ResetRestartCount => {
                    self.restart_count.store(0, Ordering::SeqCst);
                }
                Control::Dispose(ack) => {
                    if !self.exhausted {
                        self.shutdown_current().await;
                    }
                    debug!(actor = %self.actor_name(), "Guardian disposed");
                    let _ = ack.send(());
                    return;
                }
            }
        }
    }

    fn actor_name(&self) -> String {
        self.actor
            .as_ref()
            .map(|a| a.name().to_string())
            .unwrap_or_else(|| "actor".to_string())
    }

    async fn spawn_and_start(&mut self) {
        self.generation += 1;
        let controller = GuardianController {
            generation: self.generation,
            tx: self.tx.clone(),
        };
        let actor = (self.spawn)(controller.clone());
        debug!(actor = %actor.name(), "Starting actor");
        let started = actor.startup().await;
        self.actor = Some(actor);
        match started {
            Ok(()) => debug!(actor = %self.actor_name(), "Actor started"),
            Err(e) => controller.on_error(e),
        }
    }

    async fn restart(&mut self) {
        let count = self.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.options.max_restarts {
            warn!(actor = %self.actor_name(), restarts = count, "Restarts exhausted");
            self.exhausted = true;
            if let Some(callback) = &self.options.on_restarts_exhausted {
                callback();
            }
            self.shutdown_current().await;
            return;
        }

        self.shutdown_current().await;
        self.spawn_and_start().await;
    }

    async fn shutdown_current(&mut self) {
        if let Some(actor) = &self.actor {
            if let Err(e) = actor.shutdown().await {
                error!(actor = %actor.name(), error = %e, "Error while shutting down actor");
            }
        }
    }
}
