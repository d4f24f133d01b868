//! Bootstrap utilities for processes embedding the store.

use std::future::Future;
use std::time::Duration;

use backon::Retryable;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;
use crate::utils::retry::connection_backoff;

/// Initialize tracing with the STREAMSTORE_LOG environment variable.
///
/// Defaults to "info" level if STREAMSTORE_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to a backend, retrying with [`connection_backoff`].
///
/// # Arguments
/// * `backend_name` - Human-readable name for logging (e.g., "postgres")
/// * `max_attempts` - Attempts before giving up
/// * `connect` - Async function that attempts to establish a connection
///
/// # Returns
/// The connection on success, or the last error after max attempts.
pub async fn connect_with_retry<T, E, F, Fut>(
    backend_name: &str,
    max_attempts: u32,
    mut connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 0u32;

    let result = (|| {
        attempt += 1;
        connect()
    })
    .retry(connection_backoff().with_max_times(max_attempts as usize - 1))
    .notify(|err: &E, delay: Duration| {
        warn!(
            backend = backend_name,
            max_attempts,
            error = %err,
            delay = ?delay,
            "Connection failed, retrying"
        );
    })
    .await;

    match result {
        Ok(conn) => {
            info!(backend = backend_name, attempt, "Connected");
            Ok(conn)
        }
        Err(e) => {
            error!(
                backend = backend_name,
                attempts = attempt,
                error = %e,
                "Giving up connecting"
            );
            Err(e)
        }
    }
}
