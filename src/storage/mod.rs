//! Storage backends.
//!
//! The engine talks to durable storage through [`StorageBackend`]: an
//! append log keyed by stream with an atomic "append if the expected
//! version holds" primitive. Payloads cross this boundary already
//! serialized; the engine owns (de)serialization, expiry filtering, gap
//! detection and scavenge scheduling.
//!
//! # Implementations
//!
//! - [`InMemoryBackend`]: reference implementation, no feature required
//! - `PostgresBackend` (postgres feature): plpgsql functions over two tables
//! - [`mock::FaultyBackend`]: wraps another backend and injects read failures

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::message::{ExpectedVersion, Position, ReadDirection, StreamVersion};
use crate::notifier::Notifier;

pub mod memory;
pub mod mock;

#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::InMemoryBackend;

#[cfg(feature = "postgres")]
pub use postgres::PostgresBackend;

/// A message ready to be written, payloads already serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMessage {
    pub message_id: Uuid,
    pub message_type: String,
    pub data: String,
    pub meta: String,
}

/// A message as persisted, payloads still serialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub stream_id: String,
    pub message_id: Uuid,
    pub message_type: String,
    pub stream_version: StreamVersion,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub data: String,
    pub meta: String,
}

/// Retention limits of a stream. `None` disables a rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Seconds after which messages are scavengable.
    pub max_age: Option<i64>,
    /// Number of highest-version messages to keep.
    pub max_count: Option<i64>,
    /// Versions below this are scavengable.
    pub truncate_before: Option<StreamVersion>,
}

impl RetentionPolicy {
    /// True when at least one rule is active.
    pub fn is_active(&self) -> bool {
        self.max_age.is_some() || self.max_count.is_some() || self.truncate_before.is_some()
    }
}

/// Current state of a stream record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub stream_id: String,
    /// Version of the latest message, `-1` when the stream is empty.
    pub stream_version: StreamVersion,
    /// Global position of the latest message, `-1` when empty.
    pub stream_position: Position,
    pub retention: RetentionPolicy,
}

/// One page of a stream read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPage {
    pub info: StreamInfo,
    pub messages: Vec<StoredMessage>,
}

/// Result of an append at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendOutcome {
    pub stream_version: StreamVersion,
    pub stream_position: Position,
    /// Retention in effect for the stream after the write.
    pub retention: RetentionPolicy,
}

/// One entry of a stream listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedStream {
    pub stream_id: String,
    /// Monotonic creation order; used as the listing cursor.
    pub internal_id: i64,
}

/// Durable storage for streams and the global log.
///
/// Implementations must make `append`, `set_stream_metadata` and
/// `delete_stream` atomic with respect to concurrent callers, including
/// callers in other processes.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Backend name used in logs.
    fn name(&self) -> &'static str;

    /// Append to a stream, enforcing the expected version and idempotency.
    ///
    /// `created_at` of `None` lets the backend stamp its own time.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<EncodedMessage>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome>;

    /// Read up to `limit` messages starting at `from_version` inclusive.
    ///
    /// Returns `None` when the stream does not exist.
    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: StreamVersion,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Option<StreamPage>>;

    /// Read up to `limit` messages of the global log from `from_position` inclusive.
    async fn read_all(
        &self,
        from_position: Position,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Vec<StoredMessage>>;

    /// Highest position in the global log, `-1` when empty.
    async fn read_head_position(&self) -> Result<Position>;

    /// Streams created after `after_internal_id`, in creation order.
    async fn list_streams(&self, max_count: usize, after_internal_id: i64) -> Result<Vec<ListedStream>>;

    /// Append `message` to the metadata stream of `stream_id`, then store
    /// `retention` on both the metadata stream and the data stream.
    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        message: EncodedMessage,
        retention: RetentionPolicy,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome>;

    async fn delete_messages(&self, stream_id: &str, message_ids: &[Uuid]) -> Result<()>;

    /// Delete a stream and append `tombstone` to the deleted-streams log.
    ///
    /// Returns `false` when the stream did not exist.
    async fn delete_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        tombstone: EncodedMessage,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<bool>;

    /// Ids of messages violating `retention`, deduplicated.
    async fn scavengable_message_ids(
        &self,
        stream_id: &str,
        retention: &RetentionPolicy,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Uuid>>;

    /// Backend-native change notifier.
    fn create_push_notifier(&self, keep_alive: Option<Duration>) -> Arc<dyn Notifier>;

    /// Whether concurrent writers can leave transient holes in positions.
    fn has_transient_position_gaps(&self) -> bool {
        false
    }

    /// Release connections. Called once, after all writes settled.
    async fn close(&self) -> Result<()>;
}
