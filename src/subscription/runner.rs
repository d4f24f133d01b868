//! Pull-push loop shared by stream and all-subscriptions.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::{debug, error, trace};

use super::{MessageHandler, SubscribeAt, Subscription, SubscriptionOptions};
use crate::error::{Result, StoreError};
use crate::message::StreamMessage;
use crate::notifier::Notifier;
use crate::utils::retry::pull_backoff;

/// One forward page read by a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub messages: Vec<StreamMessage>,
    /// Cursor of the following page.
    pub next: i64,
    pub is_end: bool,
}

/// What a subscription reads from: a stream (cursor is a version) or the
/// global log (cursor is a position).
#[async_trait]
pub trait PageSource: Send + Sync + 'static {
    /// Read up to `count` messages forward from `cursor` inclusive.
    async fn read_page(&self, cursor: i64, count: usize) -> Result<Page>;

    /// Cursor just past the current end.
    async fn end_cursor(&self) -> Result<i64>;
}

/// Listen on `notifier`, spawn the loop and wait until its start cursor
/// is resolved.
pub(crate) async fn run<S: PageSource>(
    subscription: Subscription,
    source: S,
    handler: Arc<dyn MessageHandler>,
    options: SubscriptionOptions,
    notifier: &dyn Notifier,
) -> Result<()> {
    let wake = subscription.wake_event();
    let handle = notifier.listen(Arc::new(move || wake.set()))?;
    subscription.set_listener(handle);

    let (established_tx, established_rx) = oneshot::channel();
    let runner = Runner {
        subscription,
        source,
        handler,
        options,
        cursor: AtomicI64::new(0),
    };
    tokio::spawn(runner.run(established_tx));

    // The sender is dropped without sending only if the task panicked.
    let _ = established_rx.await;
    Ok(())
}

enum Pushed {
    All,
    Failed,
    Disposed,
}

struct Runner<S> {
    subscription: Subscription,
    source: S,
    handler: Arc<dyn MessageHandler>,
    options: SubscriptionOptions,
    cursor: AtomicI64,
}

impl<S: PageSource> Runner<S> {
    async fn run(self, established: oneshot::Sender<()>) {
        let latch = self.subscription.loop_latch();
        latch.enter_detached();

        match self.start_cursor().await {
            Ok(cursor) => {
                self.cursor.store(cursor, Ordering::SeqCst);
                let _ = established.send(());
            }
            Err(e) => {
                error!(
                    subscription = self.subscription.id(),
                    error = %e,
                    "Unable to read the end of the subscription target, dropping subscription"
                );
                latch.exit();
                self.drop_and_dispose().await;
                let _ = established.send(());
                return;
            }
        }

        debug!(
            subscription = self.subscription.id(),
            target = %self.subscription.target(),
            cursor = self.cursor.load(Ordering::SeqCst),
            "Subscription established"
        );

        let outcome = (|| self.pull_and_push())
            .retry(pull_backoff())
            .notify(|err: &StoreError, delay: Duration| {
                error!(
                    subscription = self.subscription.id(),
                    error = %err,
                    delay = ?delay,
                    "Error while pulling messages, retrying"
                );
            })
            .await;
        latch.exit();

        if let Err(e) = outcome {
            error!(
                subscription = self.subscription.id(),
                error = %e,
                "Pull retries exhausted, dropping subscription"
            );
        }

        if !self.subscription.is_disposed() {
            self.drop_and_dispose().await;
        }
    }

    async fn start_cursor(&self) -> Result<i64> {
        match self.options.subscribe_at {
            SubscribeAt::Beginning => Ok(0),
            SubscribeAt::After(n) => Ok(n + 1),
            SubscribeAt::End => self.source.end_cursor().await,
        }
    }

    /// Returns `Ok` once disposed or after a handler failure; read errors
    /// propagate so the caller can retry.
    async fn pull_and_push(&self) -> Result<()> {
        let wake = self.subscription.wake_event();
        while !self.subscription.is_disposed() {
            let mut paused = false;
            let mut caught_up: Option<bool> = None;

            while !paused && !self.subscription.is_disposed() {
                let cursor = self.cursor.load(Ordering::SeqCst);
                let page = self
                    .source
                    .read_page(cursor, self.options.max_count_per_read)
                    .await?;
                trace!(
                    subscription = self.subscription.id(),
                    cursor,
                    count = page.messages.len(),
                    is_end = page.is_end,
                    "Pulled page"
                );

                match self.push(&page.messages).await {
                    Pushed::All => {}
                    Pushed::Failed | Pushed::Disposed => return Ok(()),
                }

                paused = page.is_end && page.messages.is_empty();
                if !paused {
                    self.cursor.store(page.next, Ordering::SeqCst);
                }

                if !page.messages.is_empty() && caught_up != Some(page.is_end) {
                    caught_up = Some(page.is_end);
                    if let Some(callback) = &self.options.on_caught_up_changed {
                        callback(page.is_end);
                    }
                }
            }

            wake.wait().await;
            wake.reset();
        }
        Ok(())
    }

    /// Hand messages to the handler one at a time.
    async fn push(&self, messages: &[StreamMessage]) -> Pushed {
        for message in messages {
            if self.subscription.is_disposed() {
                return Pushed::Disposed;
            }
            let handled = AssertUnwindSafe(self.handler.handle(message.clone()))
                .catch_unwind()
                .await;
            let failure = match handled {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(_) => "handler panicked".to_string(),
            };
            error!(
                subscription = self.subscription.id(),
                message_id = %message.message_id,
                message_type = %message.message_type,
                error = %failure,
                "Error processing message, dropping subscription"
            );
            return Pushed::Failed;
        }
        Pushed::All
    }

    async fn drop_and_dispose(&self) {
        if let Some(callback) = &self.options.on_subscription_dropped {
            callback();
        }
        if let Err(e) = self.subscription.dispose().await {
            debug!(subscription = self.subscription.id(), error = %e, "Subscription already disposed");
        }
    }
}
