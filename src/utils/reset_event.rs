//! Manually reset wake-up event.

use tokio::sync::watch;

/// A flag that tasks can wait on; stays set until explicitly reset.
#[derive(Debug)]
pub struct ResetEvent {
    state: watch::Sender<bool>,
}

impl ResetEvent {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    /// Set the event, releasing current and future waiters until reset.
    pub fn set(&self) {
        self.state.send_replace(true);
    }

    pub fn reset(&self) {
        self.state.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.state.borrow()
    }

    /// Resolve once the event is set.
    pub async fn wait(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|set| *set).await;
    }
}

impl Default for ResetEvent {
    fn default() -> Self {
        Self::new()
    }
}
