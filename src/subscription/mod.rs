//! Live subscriptions over a single stream or the global log.
//!
//! A subscription is a background task that pulls pages from its cursor,
//! pushes each message to a [`MessageHandler`] one at a time, and sleeps
//! on the store's notifier once it has caught up. Both flavors share one
//! runner; they differ only in the [`PageSource`] it reads from.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{HandlerError, Result, StoreError};
use crate::message::StreamMessage;
use crate::notifier::ListenerHandle;
use crate::utils::latch::DuplexLatch;
use crate::utils::reset_event::ResetEvent;

mod all;
mod runner;
mod stream;

pub use all::AllPageSource;
pub(crate) use runner::run;
pub use runner::{Page, PageSource};
pub use stream::StreamPageSource;

/// Default page size for subscription pulls.
pub const DEFAULT_MAX_COUNT_PER_READ: usize = 20;

/// Where a subscription starts. Subscribing is exclusive: `After(n)`
/// delivers from `n + 1`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SubscribeAt {
    /// Deliver everything from the first message.
    Beginning,
    /// Deliver only messages appended after subscribing.
    #[default]
    End,
    /// Deliver messages after this version (stream) or position (all).
    After(i64),
}

/// Consumer of subscription messages.
///
/// Any `Fn(StreamMessage) -> impl Future<Output = Result<(), HandlerError>>`
/// is a handler.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: StreamMessage) -> std::result::Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(StreamMessage) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: StreamMessage) -> std::result::Result<(), HandlerError> {
        self(message).await
    }
}

pub type CaughtUpCallback = Arc<dyn Fn(bool) + Send + Sync>;
pub type DroppedCallback = Arc<dyn Fn() + Send + Sync>;
pub type DisposeHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscription settings. For stream subscriptions `subscribe_at` is a
/// stream version, for all-subscriptions a global position.
#[derive(Clone)]
pub struct SubscriptionOptions {
    pub subscribe_at: SubscribeAt,
    pub max_count_per_read: usize,
    /// Called with `true` when a page reaches the end, `false` when it no
    /// longer does. Only pages carrying messages count.
    pub on_caught_up_changed: Option<CaughtUpCallback>,
    /// Called when the subscription stops on its own: handler failure,
    /// exhausted pull retries or an unreadable start position.
    pub on_subscription_dropped: Option<DroppedCallback>,
    /// Awaited at the end of disposal, after the loop has exited.
    pub dispose: Option<DisposeHook>,
}

impl Default for SubscriptionOptions {
    fn default() -> Self {
        Self {
            subscribe_at: SubscribeAt::End,
            max_count_per_read: DEFAULT_MAX_COUNT_PER_READ,
            on_caught_up_changed: None,
            on_subscription_dropped: None,
            dispose: None,
        }
    }
}

impl SubscriptionOptions {
    pub fn at(subscribe_at: SubscribeAt) -> Self {
        Self {
            subscribe_at,
            ..Self::default()
        }
    }

    pub fn with_max_count_per_read(mut self, max_count_per_read: usize) -> Self {
        self.max_count_per_read = max_count_per_read;
        self
    }

    pub fn on_caught_up_changed(mut self, callback: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.on_caught_up_changed = Some(Arc::new(callback));
        self
    }

    pub fn on_subscription_dropped(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_subscription_dropped = Some(Arc::new(callback));
        self
    }

    pub fn on_dispose<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.dispose = Some(Arc::new(move || -> BoxFuture<'static, ()> { Box::pin(hook()) }));
        self
    }
}

impl fmt::Debug for SubscriptionOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionOptions")
            .field("subscribe_at", &self.subscribe_at)
            .field("max_count_per_read", &self.max_count_per_read)
            .finish_non_exhaustive()
    }
}

type DisposedCallback = Box<dyn FnOnce() + Send>;

struct Shared {
    id: u64,
    target: String,
    disposed: AtomicBool,
    wake: Arc<ResetEvent>,
    loop_latch: DuplexLatch,
    listener: Mutex<Option<ListenerHandle>>,
    dispose_hook: Option<DisposeHook>,
    on_disposed: Mutex<Option<DisposedCallback>>,
}

/// Handle to a running subscription. Clones refer to the same subscription.
#[derive(Clone)]
pub struct Subscription {
    shared: Arc<Shared>,
}

impl Subscription {
    /// `on_disposed` runs once, after the dispose hook.
    pub(crate) fn new(
        id: u64,
        target: impl Into<String>,
        dispose_hook: Option<DisposeHook>,
        on_disposed: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                target: target.into(),
                disposed: AtomicBool::new(false),
                wake: Arc::new(ResetEvent::new()),
                loop_latch: DuplexLatch::new(),
                listener: Mutex::new(None),
                dispose_hook,
                on_disposed: Mutex::new(Some(Box::new(on_disposed))),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    /// Stream id for stream subscriptions, `$all` otherwise.
    pub fn target(&self) -> &str {
        &self.shared.target
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::SeqCst)
    }

    /// Stop the subscription.
    ///
    /// Waits for the message being handled to finish, then runs the
    /// dispose hook. A second call fails with [`StoreError::Disposed`].
    pub async fn dispose(&self) -> Result<()> {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed(format!(
                "subscription {} has already been disposed",
                self.shared.id
            )));
        }
        debug!(subscription = self.shared.id, target = %self.shared.target, "Disposing subscription");

        let listener = lock(&self.shared.listener).take();
        drop(listener);
        self.shared.wake.set();
        self.shared.loop_latch.wait().await;

        if let Some(hook) = &self.shared.dispose_hook {
            hook().await;
        }
        let on_disposed = lock(&self.shared.on_disposed).take();
        if let Some(on_disposed) = on_disposed {
            on_disposed();
        }
        Ok(())
    }

    pub(crate) fn wake_event(&self) -> Arc<ResetEvent> {
        self.shared.wake.clone()
    }

    /// Keep `handle` until disposal; dropped at once if already disposed.
    pub(crate) fn set_listener(&self, handle: ListenerHandle) {
        let mut listener = lock(&self.shared.listener);
        if !self.is_disposed() {
            *listener = Some(handle);
        }
    }

    pub(crate) fn loop_latch(&self) -> &DuplexLatch {
        &self.shared.loop_latch
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.shared.id)
            .field("target", &self.shared.target)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
