//! Enter/exit counter that can be awaited until it drains to zero.
//!
//! The store tracks every in-flight write with one of these so disposal can
//! wait for writes to settle before closing the backend. Subscriptions use
//! one to wait for their pull-push loop to exit.

use tokio::sync::watch;

/// Counts in-flight operations; `wait` resolves once the count is zero.
#[derive(Debug)]
pub struct DuplexLatch {
    count: watch::Sender<usize>,
}

impl DuplexLatch {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    /// Enter the latch. The returned guard exits on drop.
    pub fn enter(&self) -> LatchGuard<'_> {
        self.count.send_modify(|c| *c += 1);
        LatchGuard { latch: self }
    }

    /// Enter without a guard; pair with [`DuplexLatch::exit`].
    ///
    /// For work that outlives the borrow of the latch, such as a spawned purge.
    pub fn enter_detached(&self) {
        self.count.send_modify(|c| *c += 1);
    }

    pub fn exit(&self) {
        self.count.send_modify(|c| *c = c.saturating_sub(1));
    }

    pub fn in_flight(&self) -> usize {
        *self.count.borrow()
    }

    /// Resolve once no operation is in flight.
    pub async fn wait(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|c| *c == 0).await;
    }
}

impl Default for DuplexLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Exits the latch when dropped.
#[must_use = "dropping the guard exits the latch immediately"]
pub struct LatchGuard<'a> {
    latch: &'a DuplexLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.exit();
    }
}
