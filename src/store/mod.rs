//! The stream store contract and its engine.
//!
//! [`StreamStore`] is the public surface: appends with optimistic
//! concurrency and idempotency, paged reads over streams and the global
//! log, stream metadata with retention, deletion and live subscriptions.
//! [`StreamStoreEngine`] implements it once over any
//! [`StorageBackend`](crate::storage::StorageBackend).

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::message::{
    AppendResult, ExpectedVersion, ListStreamsResult, NewStreamMessage, Position, ReadAllResult,
    ReadDirection, ReadFrom, ReadStreamResult, SetStreamMetadataOptions, SetStreamMetadataResult,
    StreamMetadataResult,
};
use crate::subscription::{MessageHandler, Subscription, SubscriptionOptions};

pub mod engine;
pub mod expiry;
pub mod gap_detection;
pub mod idempotency;
pub mod metadata_cache;
pub mod validation;

pub use engine::{Clock, InMemoryStreamStore, StreamStoreEngine, StreamStoreEngineBuilder};

#[cfg(feature = "postgres")]
pub use engine::PostgresStreamStore;

/// Append-only multi-stream message store.
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// Append `messages` to `stream_id` if `expected` holds.
    ///
    /// Re-appending a batch that was already applied succeeds without
    /// writing and returns the stream's current version and position.
    async fn append_to_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
    ) -> Result<AppendResult>;

    /// Read up to `count` messages of a stream starting at `from` inclusive.
    ///
    /// A missing stream reads as an empty end page with version `-1`.
    async fn read_stream(
        &self,
        stream_id: &str,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadStreamResult>;

    /// Read up to `count` messages of the global log starting at `from` inclusive.
    async fn read_all(
        &self,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadAllResult>;

    /// Position of the newest message in the store, `-1` when empty.
    async fn read_head_position(&self) -> Result<Position>;

    /// Page through stream ids in creation order.
    ///
    /// Pass the returned cursor to get the next page; an empty page means
    /// the listing is complete.
    async fn list_streams(&self, max_count: usize, cursor: Option<&str>) -> Result<ListStreamsResult>;

    async fn read_stream_metadata(&self, stream_id: &str) -> Result<StreamMetadataResult>;

    /// Write a new metadata revision for `stream_id`.
    ///
    /// `expected` applies to the metadata stream, not the data stream.
    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        options: SetStreamMetadataOptions,
    ) -> Result<SetStreamMetadataResult>;

    async fn delete_message(&self, stream_id: &str, message_id: Uuid) -> Result<()>;

    /// Delete a stream and record a tombstone in `$deleted`.
    ///
    /// Returns `false` when the stream did not exist.
    async fn delete_stream(&self, stream_id: &str, expected: ExpectedVersion) -> Result<bool>;

    /// Subscribe to one stream. Resolves once the start version is known.
    async fn subscribe_to_stream(
        &self,
        stream_id: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<Subscription>;

    /// Subscribe to the global log. Resolves once the start position is known.
    async fn subscribe_to_all(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<Subscription>;

    /// Stop subscriptions, let in-flight writes finish and close the backend.
    ///
    /// A second call fails with [`StoreError::Disposed`](crate::error::StoreError::Disposed).
    async fn dispose(&self) -> Result<()>;
}
