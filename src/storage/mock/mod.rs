//! Fault-injecting backend wrapper for testing.
//!
//! [`FaultyBackend`] delegates to any [`StorageBackend`] and fails selected
//! operations on demand, so retry, drop and swallow paths can be driven
//! deterministically.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    AppendOutcome, EncodedMessage, ListedStream, RetentionPolicy, StorageBackend, StoredMessage,
    StreamPage,
};
use crate::error::{Result, StoreError};
use crate::message::{ExpectedVersion, Position, ReadDirection, StreamVersion};
use crate::notifier::Notifier;

/// Backend wrapper with `fail_on_*` toggles.
pub struct FaultyBackend<B> {
    inner: B,
    fail_on_append: RwLock<bool>,
    fail_on_read_stream: RwLock<bool>,
    fail_on_read_all: RwLock<bool>,
    fail_on_head: RwLock<bool>,
    fail_on_delete_messages: RwLock<bool>,
    /// Reads (stream or all) that fail before reads succeed again.
    failing_reads: AtomicU32,
    reads: AtomicU32,
    transient_gaps: bool,
}

impl<B: StorageBackend> FaultyBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            fail_on_append: RwLock::new(false),
            fail_on_read_stream: RwLock::new(false),
            fail_on_read_all: RwLock::new(false),
            fail_on_head: RwLock::new(false),
            fail_on_delete_messages: RwLock::new(false),
            failing_reads: AtomicU32::new(0),
            reads: AtomicU32::new(0),
            transient_gaps: false,
        }
    }

    /// Report transient position gaps regardless of the wrapped backend.
    pub fn with_transient_position_gaps(mut self) -> Self {
        self.transient_gaps = true;
        self
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub async fn set_fail_on_append(&self, fail: bool) {
        *self.fail_on_append.write().await = fail;
    }

    pub async fn set_fail_on_read_stream(&self, fail: bool) {
        *self.fail_on_read_stream.write().await = fail;
    }

    pub async fn set_fail_on_read_all(&self, fail: bool) {
        *self.fail_on_read_all.write().await = fail;
    }

    pub async fn set_fail_on_head(&self, fail: bool) {
        *self.fail_on_head.write().await = fail;
    }

    pub async fn set_fail_on_delete_messages(&self, fail: bool) {
        *self.fail_on_delete_messages.write().await = fail;
    }

    /// Fail the next `count` stream or global reads, then recover.
    pub fn fail_next_reads(&self, count: u32) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Stream and global reads attempted so far, failed ones included.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    async fn check(toggle: &RwLock<bool>, operation: &str) -> Result<()> {
        if *toggle.read().await {
            return Err(injected(operation));
        }
        Ok(())
    }

    async fn check_read(&self, toggle: &RwLock<bool>, operation: &str) -> Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Self::check(toggle, operation).await?;
        let consumed = self
            .failing_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(injected(operation));
        }
        Ok(())
    }
}

fn injected(operation: &str) -> StoreError {
    StoreError::Backend(format!("injected {} failure", operation))
}

#[async_trait]
impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<EncodedMessage>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        Self::check(&self.fail_on_append, "append").await?;
        self.inner.append(stream_id, expected, messages, created_at).await
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: StreamVersion,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Option<StreamPage>> {
        self.check_read(&self.fail_on_read_stream, "read_stream").await?;
        self.inner.read_stream(stream_id, from_version, limit, direction).await
    }

    async fn read_all(
        &self,
        from_position: Position,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Vec<StoredMessage>> {
        self.check_read(&self.fail_on_read_all, "read_all").await?;
        self.inner.read_all(from_position, limit, direction).await
    }

    async fn read_head_position(&self) -> Result<Position> {
        Self::check(&self.fail_on_head, "read_head_position").await?;
        self.inner.read_head_position().await
    }

    async fn list_streams(&self, max_count: usize, after_internal_id: i64) -> Result<Vec<ListedStream>> {
        self.inner.list_streams(max_count, after_internal_id).await
    }

    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        message: EncodedMessage,
        retention: RetentionPolicy,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        Self::check(&self.fail_on_append, "set_stream_metadata").await?;
        self.inner
            .set_stream_metadata(stream_id, expected, message, retention, created_at)
            .await
    }

    async fn delete_messages(&self, stream_id: &str, message_ids: &[Uuid]) -> Result<()> {
        Self::check(&self.fail_on_delete_messages, "delete_messages").await?;
        self.inner.delete_messages(stream_id, message_ids).await
    }

    async fn delete_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        tombstone: EncodedMessage,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        self.inner.delete_stream(stream_id, expected, tombstone, created_at).await
    }

    async fn scavengable_message_ids(
        &self,
        stream_id: &str,
        retention: &RetentionPolicy,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Uuid>> {
        self.inner.scavengable_message_ids(stream_id, retention, now).await
    }

    fn create_push_notifier(&self, keep_alive: Option<Duration>) -> Arc<dyn Notifier> {
        self.inner.create_push_notifier(keep_alive)
    }

    fn has_transient_position_gaps(&self) -> bool {
        self.transient_gaps || self.inner.has_transient_position_gaps()
    }

    async fn close(&self) -> Result<()> {
        self.inner.close().await
    }
}
