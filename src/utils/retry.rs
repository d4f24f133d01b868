//! Retry utilities: backoff builders and a concurrency retry combinator.
//!
//! Uses `backon` for exponential backoff with jitter. Provides the backoff
//! for internal `ExpectedVersion::Any` append retries, subscription pull
//! retries and backend connection retries.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::debug;

use crate::config::RetryConfig;
use crate::error::{Result, StoreError};

/// Backoff for appends under `ExpectedVersion::Any` racing other writers.
///
/// Built from [`RetryConfig`] so deployments can tune it.
pub fn append_backoff(config: &RetryConfig) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(config.min_delay_ms))
        .with_max_delay(Duration::from_millis(config.max_delay_ms))
        .with_max_times(config.max_times)
        .with_jitter()
}

/// Backoff for subscription page pulls.
///
/// - Min delay: 50ms
/// - Max delay: 5s
/// - Max attempts: 10
/// - Jitter enabled
pub fn pull_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(10)
        .with_jitter()
}

/// Backoff for backend connection retries at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max retries: 30, overridden by `connect_retries` when connecting
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Re-run a read-decide-append cycle while it fails on a version conflict.
///
/// Intended for callers writing with a specific expected version: the closure
/// should re-read the stream, recompute the messages and append again.
/// Every other error is returned immediately.
pub async fn concurrency_retry<T, F, Fut>(backoff: ExponentialBuilder, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    operation
        .retry(backoff)
        .when(StoreError::is_wrong_expected_version)
        .notify(|err: &StoreError, dur: Duration| {
            debug!(error = %err, delay = ?dur, "Concurrency conflict, retrying");
        })
        .await
}
