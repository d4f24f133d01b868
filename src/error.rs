//! Error types shared by the store, its backends, notifiers and subscriptions.

use uuid::Uuid;

/// Errors surfaced by stream store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Malformed or missing caller input. Never retried.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Optimistic concurrency violation that idempotency could not resolve.
    #[error("Wrong expected version {expected_version} for stream {stream_id}")]
    WrongExpectedVersion {
        stream_id: String,
        expected_version: i64,
    },

    /// A message id already stored in the stream at a position the
    /// idempotency rules do not allow.
    #[error("Duplicate message {message_id} in stream {stream_id}")]
    DuplicateMessage { stream_id: String, message_id: Uuid },

    /// The store (or subscription) is disposing or has been disposed.
    #[error("Disposed: {0}")]
    Disposed(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[cfg(feature = "postgres")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Notifier error: {0}")]
    Notifier(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn wrong_expected_version(stream_id: impl Into<String>, expected_version: i64) -> Self {
        StoreError::WrongExpectedVersion {
            stream_id: stream_id.into(),
            expected_version,
        }
    }

    pub fn disposed() -> Self {
        StoreError::Disposed("the stream store has been disposed".to_string())
    }

    /// True for optimistic concurrency failures.
    pub fn is_wrong_expected_version(&self) -> bool {
        matches!(self, StoreError::WrongExpectedVersion { .. })
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, StoreError::Disposed(_))
    }

    /// Transient failures worth retrying (connectivity, backend hiccups).
    ///
    /// Caller mistakes, concurrency conflicts and disposal are never retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Backend(_) | StoreError::Notifier(_) => true,
            #[cfg(feature = "postgres")]
            StoreError::Database(_) => true,
            _ => false,
        }
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type returned by consumer callbacks.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
