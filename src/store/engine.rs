//! Stream store engine.
//!
//! Orchestrates a [`StorageBackend`] into the [`StreamStore`] contract:
//! validation, serialization, read paging, expiry filtering, gap
//! detection, scavenge scheduling, subscriptions and graceful disposal.
//!
//! Every write-class operation holds the write latch while it runs.
//! Disposal flips `disposing` (later writes fail), disposes subscriptions
//! and the notifier, waits for the latch to drain and closes the backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::expiry::filter_expired;
use super::gap_detection::read_with_gap_detection;
use super::metadata_cache::MetadataCache;
use super::validation::{
    parse_cursor, validate_count, validate_expected_version, validate_messages,
    validate_metadata_options, validate_stream_id, validate_writable_stream_id,
};
use super::StreamStore;
use crate::config::{NotifierConfig, StoreConfig};
use crate::error::{Result, StoreError};
use crate::message::{
    AppendResult, ExpectedVersion, ListStreamsResult, MetadataPayload, NewStreamMessage, Position,
    ReadAllResult, ReadDirection, ReadFrom, ReadStreamResult, SetStreamMetadataOptions,
    SetStreamMetadataResult, StreamDeletedPayload, StreamMessage, StreamMetadataResult,
    StreamVersion,
};
use crate::notifier::polling::HeadReader;
use crate::notifier::{Notifier, PollingNotifier};
use crate::serialization::{JsonSerializer, MessageSerializer};
use crate::storage::{
    AppendOutcome, EncodedMessage, InMemoryBackend, RetentionPolicy, StorageBackend, StoredMessage,
};
use crate::subscription::{
    self, AllPageSource, MessageHandler, StreamPageSource, Subscription, SubscriptionOptions,
};
use crate::utils::ids::{
    is_operational_stream, metadata_stream_id, stream_deleted_message_id,
    STREAM_DELETED_MESSAGE_TYPE, STREAM_METADATA_MESSAGE_TYPE,
};
use crate::utils::latch::{DuplexLatch, LatchGuard};
use crate::utils::retry::{append_backoff, concurrency_retry};

#[cfg(feature = "postgres")]
use crate::storage::PostgresBackend;

/// Supplies `created_at` for new messages and "now" for expiry checks.
///
/// `None` lets the backend decide (server time for Postgres).
pub type Clock = Arc<dyn Fn() -> Option<DateTime<Utc>> + Send + Sync>;

/// Engine over the in-memory backend.
pub type InMemoryStreamStore = StreamStoreEngine<InMemoryBackend>;

/// Engine over the Postgres backend.
#[cfg(feature = "postgres")]
pub type PostgresStreamStore = StreamStoreEngine<PostgresBackend>;

/// Target name of all-subscriptions.
const ALL_TARGET: &str = "$all";

/// Builder for [`StreamStoreEngine`].
pub struct StreamStoreEngineBuilder<B> {
    backend: B,
    config: StoreConfig,
    serializer: Arc<dyn MessageSerializer>,
    clock: Clock,
}

impl<B: StorageBackend> StreamStoreEngineBuilder<B> {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn serializer(mut self, serializer: impl MessageSerializer + 'static) -> Self {
        self.serializer = Arc::new(serializer);
        self
    }

    pub fn clock(mut self, clock: impl Fn() -> Option<DateTime<Utc>> + Send + Sync + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn build(self) -> StreamStoreEngine<B> {
        info!(backend = self.backend.name(), "Stream store created");
        StreamStoreEngine {
            inner: Arc::new(Inner {
                backend: Arc::new(self.backend),
                metadata_cache: MetadataCache::new(self.config.metadata_cache_ttl()),
                config: self.config,
                serializer: self.serializer,
                clock: self.clock,
                write_latch: DuplexLatch::new(),
                disposing: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                notifier: Mutex::new(None),
                subscriptions: Arc::new(StdMutex::new(HashMap::new())),
                next_subscription_id: AtomicU64::new(1),
            }),
        }
    }
}

/// [`StreamStore`] implementation over a [`StorageBackend`].
///
/// Cheap to clone; clones share state. Call [`StreamStore::dispose`] to
/// stop subscriptions and release the backend.
pub struct StreamStoreEngine<B: StorageBackend> {
    inner: Arc<Inner<B>>,
}

impl<B: StorageBackend> Clone for StreamStoreEngine<B> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

type SubscriptionRegistry = Arc<StdMutex<HashMap<u64, Subscription>>>;

struct Inner<B> {
    backend: Arc<B>,
    config: StoreConfig,
    serializer: Arc<dyn MessageSerializer>,
    clock: Clock,
    write_latch: DuplexLatch,
    disposing: AtomicBool,
    /// Set once the backend has been closed; reads fail from then on.
    closed: AtomicBool,
    metadata_cache: MetadataCache,
    /// Created on first subscription.
    notifier: Mutex<Option<Arc<dyn Notifier>>>,
    subscriptions: SubscriptionRegistry,
    next_subscription_id: AtomicU64,
}

impl<B: StorageBackend> StreamStoreEngine<B> {
    pub fn builder(backend: B) -> StreamStoreEngineBuilder<B> {
        StreamStoreEngineBuilder {
            backend,
            config: StoreConfig::default(),
            serializer: Arc::new(JsonSerializer::new()),
            clock: Arc::new(|| None),
        }
    }

    pub fn new(backend: B, config: StoreConfig) -> Self {
        Self::builder(backend).config(config).build()
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Writes currently holding the latch, background purges included.
    pub fn writes_in_flight(&self) -> usize {
        self.inner.write_latch.in_flight()
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.inner.subscriptions).len()
    }

    async fn subscribe<S: subscription::PageSource>(
        &self,
        target: &str,
        source: S,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        self.inner.ensure_not_disposing()?;
        validate_count(options.max_count_per_read)?;
        let notifier = self.inner.notifier().await?;

        let handle = self.inner.register_subscription(target, &options);
        if self.inner.disposing.load(Ordering::SeqCst) {
            let _ = handle.dispose().await;
            return Err(StoreError::disposed());
        }

        if let Err(e) = subscription::run(handle.clone(), source, handler, options, notifier.as_ref()).await {
            let _ = handle.dispose().await;
            return Err(e);
        }
        Ok(handle)
    }
}

impl StreamStoreEngine<InMemoryBackend> {
    /// In-memory store with the given configuration.
    pub fn in_memory(config: StoreConfig) -> Self {
        Self::new(InMemoryBackend::new(), config)
    }
}

#[cfg(feature = "postgres")]
impl StreamStoreEngine<PostgresBackend> {
    /// Connect with `config.postgres` and install the schema if missing.
    pub async fn connect(config: StoreConfig) -> Result<Self> {
        let backend = PostgresBackend::connect(&config.postgres).await?;
        if !backend.is_schema_ready().await? {
            backend.init().await?;
        }
        Ok(Self::new(backend, config))
    }
}

impl<B: StorageBackend> Inner<B> {
    fn ensure_not_disposing(&self) -> Result<()> {
        if self.disposing.load(Ordering::SeqCst) {
            return Err(StoreError::disposed());
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::disposed());
        }
        Ok(())
    }

    /// Enter the write latch, failing if disposal has begun.
    ///
    /// The flag is checked after entering so disposal either sees this
    /// write in the latch or the write sees the flag.
    fn begin_write(&self) -> Result<LatchGuard<'_>> {
        let guard = self.write_latch.enter();
        self.ensure_not_disposing()?;
        Ok(guard)
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)().unwrap_or_else(Utc::now)
    }

    fn encode(&self, message: &NewStreamMessage) -> Result<EncodedMessage> {
        let meta = message
            .meta
            .clone()
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        Ok(EncodedMessage {
            message_id: message.message_id,
            message_type: message.message_type.clone(),
            data: self.serializer.serialize(&message.data)?,
            meta: self.serializer.serialize(&meta)?,
        })
    }

    fn decode(&self, message: StoredMessage) -> Result<StreamMessage> {
        Ok(StreamMessage {
            data: self.serializer.deserialize(&message.data)?,
            meta: self.serializer.deserialize(&message.meta)?,
            stream_id: message.stream_id,
            message_id: message.message_id,
            message_type: message.message_type,
            stream_version: message.stream_version,
            position: message.position,
            created_at: message.created_at,
        })
    }

    fn decode_all(&self, messages: Vec<StoredMessage>) -> Result<Vec<StreamMessage>> {
        messages.into_iter().map(|m| self.decode(m)).collect()
    }

    /// Run a backend write, retrying lost races when the caller asked for `Any`.
    async fn write_with_retry<F, Fut>(&self, expected: ExpectedVersion, mut write: F) -> Result<AppendOutcome>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<AppendOutcome>>,
    {
        if expected == ExpectedVersion::Any {
            concurrency_retry(append_backoff(&self.config.append_retry), write).await
        } else {
            write().await
        }
    }

    #[tracing::instrument(name = "store.append", skip_all, fields(%stream_id, %expected))]
    async fn append(
        self: &Arc<Self>,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
    ) -> Result<AppendResult> {
        validate_writable_stream_id(stream_id)?;
        validate_expected_version(expected)?;
        validate_messages(&messages)?;
        let _guard = self.begin_write()?;

        let encoded = messages
            .iter()
            .map(|m| self.encode(m))
            .collect::<Result<Vec<_>>>()?;
        let created_at = (self.clock)();

        let outcome = self
            .write_with_retry(expected, || {
                self.backend
                    .append(stream_id, expected, encoded.clone(), created_at)
            })
            .await?;
        debug!(
            count = messages.len(),
            stream_version = outcome.stream_version,
            "Appended to stream"
        );

        self.maybe_scavenge(stream_id, outcome.retention).await;
        Ok(AppendResult {
            stream_version: outcome.stream_version,
            stream_position: outcome.stream_position,
        })
    }

    #[tracing::instrument(name = "store.read_stream", skip_all, fields(%stream_id, ?from, count, ?direction))]
    async fn read_stream(
        self: &Arc<Self>,
        stream_id: &str,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadStreamResult> {
        validate_stream_id(stream_id)?;
        validate_count(count)?;
        self.ensure_open()?;

        let from_version = match from {
            ReadFrom::Start => 0,
            ReadFrom::End => StreamVersion::MAX,
            ReadFrom::At(version) => version,
        };
        let forward = direction == ReadDirection::Forward;

        let Some(page) = self
            .backend
            .read_stream(stream_id, from_version, count.saturating_add(1), direction)
            .await?
        else {
            return Ok(ReadStreamResult {
                stream_id: stream_id.to_string(),
                stream_version: -1,
                stream_position: -1,
                next_version: if forward { 0 } else { -1 },
                is_end: true,
                messages: Vec::new(),
            });
        };

        let mut messages = page.messages;
        let is_end = messages.len() <= count;
        messages.truncate(count);

        let last_version = messages.last().map(|m| m.stream_version);
        let next_version = match (forward, is_end, last_version) {
            (true, false, Some(last)) => last + 1,
            (true, _, _) => page.info.stream_version + 1,
            (false, false, Some(last)) => (last - 1).max(-1),
            (false, _, _) => -1,
        };

        let messages = self.decode_all(messages)?;
        let messages = self.hide_expired(messages).await?;
        Ok(ReadStreamResult {
            stream_id: page.info.stream_id,
            stream_version: page.info.stream_version,
            stream_position: page.info.stream_position,
            next_version,
            is_end,
            messages,
        })
    }

    #[tracing::instrument(name = "store.read_all", skip_all, fields(?from, count, ?direction))]
    async fn read_all(
        self: &Arc<Self>,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadAllResult> {
        validate_count(count)?;
        self.ensure_open()?;

        let result = match (from, direction) {
            (ReadFrom::End, _) | (_, ReadDirection::Backward) => {
                self.read_all_page(from, count, direction).await?
            }
            (_, ReadDirection::Forward) if self.backend.has_transient_position_gaps() => {
                let from_position = resolve_position(from);
                read_with_gap_detection(
                    from_position,
                    self.config.gap_reload_delay(),
                    self.config.gap_reload_times,
                    || self.read_all_page(from, count, direction),
                )
                .await?
            }
            _ => self.read_all_page(from, count, direction).await?,
        };

        let messages = self.hide_expired(result.messages).await?;
        Ok(ReadAllResult { messages, ..result })
    }

    /// One probed page of the global log, not yet expiry-filtered.
    async fn read_all_page(
        &self,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadAllResult> {
        let from_position = resolve_position(from);
        let forward = direction == ReadDirection::Forward;

        let mut messages = self
            .backend
            .read_all(from_position, count.saturating_add(1), direction)
            .await?;
        let is_end = messages.len() <= count;
        messages.truncate(count);

        let next_position = match messages.last() {
            Some(last) if forward => last.position + 1,
            Some(last) => (last.position - 1).max(-1),
            None if !forward => -1,
            None if from == ReadFrom::End => self.backend.read_head_position().await? + 1,
            None => from_position,
        };

        Ok(ReadAllResult {
            next_position,
            is_end,
            messages: self.decode_all(messages)?,
        })
    }

    async fn read_head_position(&self) -> Result<Position> {
        self.ensure_open()?;
        self.backend.read_head_position().await
    }

    async fn list_streams(&self, max_count: usize, cursor: Option<&str>) -> Result<ListStreamsResult> {
        validate_count(max_count)?;
        self.ensure_open()?;
        let after = parse_cursor(cursor)?;

        let listed = self.backend.list_streams(max_count, after).await?;
        let cursor = listed
            .last()
            .map(|stream| stream.internal_id)
            .unwrap_or(after)
            .to_string();
        Ok(ListStreamsResult {
            stream_ids: listed.into_iter().map(|stream| stream.stream_id).collect(),
            cursor,
        })
    }

    /// Latest revision of the metadata stream, bypassing expiry filtering.
    async fn read_metadata(&self, stream_id: &str) -> Result<StreamMetadataResult> {
        let page = self
            .backend
            .read_stream(
                &metadata_stream_id(stream_id),
                StreamVersion::MAX,
                1,
                ReadDirection::Backward,
            )
            .await?;
        let Some(latest) = page.and_then(|page| page.messages.into_iter().next()) else {
            return Ok(StreamMetadataResult::none(stream_id));
        };

        let version = latest.stream_version;
        let payload: MetadataPayload =
            serde_json::from_value(self.serializer.deserialize(&latest.data)?)?;
        Ok(payload.into_result(stream_id, version))
    }

    async fn read_stream_metadata(&self, stream_id: &str) -> Result<StreamMetadataResult> {
        validate_stream_id(stream_id)?;
        self.ensure_open()?;
        self.read_metadata(stream_id).await
    }

    #[tracing::instrument(name = "store.set_stream_metadata", skip_all, fields(%stream_id, %expected))]
    async fn set_stream_metadata(
        self: &Arc<Self>,
        stream_id: &str,
        expected: ExpectedVersion,
        options: SetStreamMetadataOptions,
    ) -> Result<SetStreamMetadataResult> {
        validate_writable_stream_id(stream_id)?;
        validate_expected_version(expected)?;
        validate_metadata_options(&options)?;
        let _guard = self.begin_write()?;

        let payload = MetadataPayload::from_options(&options);
        let retention = RetentionPolicy {
            max_age: payload.max_age,
            max_count: payload.max_count,
            truncate_before: payload.truncate_before,
        };
        let message = EncodedMessage {
            message_id: Uuid::new_v4(),
            message_type: STREAM_METADATA_MESSAGE_TYPE.to_string(),
            data: self.serializer.serialize(&serde_json::to_value(&payload)?)?,
            meta: self.serializer.serialize(&serde_json::json!({}))?,
        };
        let created_at = (self.clock)();

        let outcome = self
            .write_with_retry(expected, || {
                self.backend
                    .set_stream_metadata(stream_id, expected, message.clone(), retention, created_at)
            })
            .await?;
        self.metadata_cache.invalidate(stream_id).await;
        debug!(
            metadata_version = outcome.stream_version,
            ?retention,
            "Stream metadata set"
        );

        self.maybe_scavenge(stream_id, retention).await;
        Ok(SetStreamMetadataResult {
            current_version: outcome.stream_version,
        })
    }

    async fn delete_message(&self, stream_id: &str, message_id: Uuid) -> Result<()> {
        validate_stream_id(stream_id)?;
        let _guard = self.begin_write()?;
        self.backend.delete_messages(stream_id, &[message_id]).await?;
        debug!(%stream_id, %message_id, "Message deleted");
        Ok(())
    }

    #[tracing::instrument(name = "store.delete_stream", skip_all, fields(%stream_id, %expected))]
    async fn delete_stream(&self, stream_id: &str, expected: ExpectedVersion) -> Result<bool> {
        validate_writable_stream_id(stream_id)?;
        validate_expected_version(expected)?;
        let _guard = self.begin_write()?;

        let payload = StreamDeletedPayload {
            stream_id: stream_id.to_string(),
        };
        let tombstone = EncodedMessage {
            message_id: stream_deleted_message_id(stream_id, expected.as_i64()),
            message_type: STREAM_DELETED_MESSAGE_TYPE.to_string(),
            data: self.serializer.serialize(&serde_json::to_value(&payload)?)?,
            meta: self.serializer.serialize(&serde_json::json!({}))?,
        };

        let deleted = self
            .backend
            .delete_stream(stream_id, expected, tombstone, (self.clock)())
            .await?;
        if deleted {
            self.metadata_cache.invalidate(stream_id).await;
            info!("Stream deleted");
        }
        Ok(deleted)
    }

    /// Hide expired messages and purge them in the background.
    async fn hide_expired(self: &Arc<Self>, messages: Vec<StreamMessage>) -> Result<Vec<StreamMessage>> {
        if !self.config.reading.filter_expired_messages || messages.is_empty() {
            return Ok(messages);
        }

        let mut paired = Vec::with_capacity(messages.len());
        for message in messages {
            let max_age = if is_operational_stream(&message.stream_id) {
                None
            } else {
                let stream_id = message.stream_id.as_str();
                self.metadata_cache
                    .max_age(stream_id, || async move {
                        Ok::<_, StoreError>(self.read_metadata(stream_id).await?.max_age)
                    })
                    .await?
            };
            paired.push((message, max_age));
        }

        let partition = filter_expired(paired, self.now());
        if !partition.expired.is_empty() {
            self.purge_expired(partition.expired_by_stream());
        }
        Ok(partition.valid)
    }

    /// Delete expired messages without blocking the read that found them.
    fn purge_expired(self: &Arc<Self>, expired: HashMap<String, Vec<Uuid>>) {
        if self.disposing.load(Ordering::SeqCst) {
            return;
        }
        for (stream_id, message_ids) in expired {
            let inner = self.clone();
            inner.write_latch.enter_detached();
            tokio::spawn(async move {
                match inner.backend.delete_messages(&stream_id, &message_ids).await {
                    Ok(()) => debug!(%stream_id, count = message_ids.len(), "Purged expired messages"),
                    Err(e) => warn!(%stream_id, error = %e, "Failed to purge expired messages"),
                }
                inner.write_latch.exit();
            });
        }
    }

    /// Enforce `retention` on a data stream, awaited or in the background.
    async fn maybe_scavenge(self: &Arc<Self>, stream_id: &str, retention: RetentionPolicy) {
        if !retention.is_active() || is_operational_stream(stream_id) {
            return;
        }

        if self.config.scavenge_synchronously || self.disposing.load(Ordering::SeqCst) {
            let _guard = self.write_latch.enter();
            self.scavenge(stream_id, &retention).await;
            return;
        }

        let inner = self.clone();
        let stream_id = stream_id.to_string();
        inner.write_latch.enter_detached();
        tokio::spawn(async move {
            inner.scavenge(&stream_id, &retention).await;
            inner.write_latch.exit();
        });
    }

    /// Delete messages violating `retention`. Failures are logged only.
    async fn scavenge(&self, stream_id: &str, retention: &RetentionPolicy) {
        let result = async {
            let ids = self
                .backend
                .scavengable_message_ids(stream_id, retention, (self.clock)())
                .await?;
            if !ids.is_empty() {
                self.backend.delete_messages(stream_id, &ids).await?;
            }
            Ok::<_, StoreError>(ids.len())
        }
        .await;

        match result {
            Ok(0) => {}
            Ok(count) => debug!(%stream_id, count, "Scavenged messages"),
            Err(e) => error!(%stream_id, error = %e, "Scavenge failed"),
        }
    }

    async fn notifier(self: &Arc<Self>) -> Result<Arc<dyn Notifier>> {
        let mut slot = self.notifier.lock().await;
        // Checked under the slot lock: dispose() flips the flag before taking the slot.
        self.ensure_not_disposing()?;
        if let Some(notifier) = slot.as_ref() {
            return Ok(notifier.clone());
        }

        let notifier: Arc<dyn Notifier> = match &self.config.notifier {
            NotifierConfig::Poll { interval_ms } => {
                let backend = self.backend.clone();
                let read_head: HeadReader = Arc::new(move || {
                    let backend = backend.clone();
                    async move { backend.read_head_position().await }.boxed()
                });
                Arc::new(PollingNotifier::start(
                    Duration::from_millis(*interval_ms),
                    read_head,
                ))
            }
            NotifierConfig::Push {
                keep_alive_interval_ms,
            } => self
                .backend
                .create_push_notifier(keep_alive_interval_ms.map(Duration::from_millis)),
        };
        *slot = Some(notifier.clone());
        Ok(notifier)
    }

    fn register_subscription(&self, target: &str, options: &SubscriptionOptions) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let registry: Weak<StdMutex<HashMap<u64, Subscription>>> = Arc::downgrade(&self.subscriptions);
        let subscription = Subscription::new(id, target, options.dispose.clone(), move || {
            if let Some(registry) = registry.upgrade() {
                lock(&registry).remove(&id);
            }
        });
        lock(&self.subscriptions).insert(id, subscription.clone());
        debug!(subscription = id, %target, "Subscription registered");
        subscription
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposing.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed(
                "the stream store has already been disposed".to_string(),
            ));
        }
        info!(backend = self.backend.name(), "Disposing stream store");

        let subscriptions: Vec<Subscription> = lock(&self.subscriptions).values().cloned().collect();
        let results = futures::future::join_all(subscriptions.iter().map(|s| s.dispose())).await;
        for (subscription, result) in subscriptions.iter().zip(results) {
            if let Err(e) = result {
                debug!(subscription = subscription.id(), error = %e, "Subscription already disposed");
            }
        }

        if let Some(notifier) = self.notifier.lock().await.take() {
            if let Err(e) = notifier.dispose().await {
                warn!(error = %e, "Failed to dispose notifier");
            }
        }

        self.write_latch.wait().await;
        self.closed.store(true, Ordering::SeqCst);
        self.backend.close().await?;
        info!("Stream store disposed");
        Ok(())
    }
}

fn resolve_position(from: ReadFrom) -> Position {
    match from {
        ReadFrom::Start => 0,
        ReadFrom::End => Position::MAX,
        ReadFrom::At(position) => position,
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl<B: StorageBackend> StreamStore for StreamStoreEngine<B> {
    async fn append_to_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<NewStreamMessage>,
    ) -> Result<AppendResult> {
        self.inner.append(stream_id, expected, messages).await
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadStreamResult> {
        self.inner.read_stream(stream_id, from, count, direction).await
    }

    async fn read_all(
        &self,
        from: ReadFrom,
        count: usize,
        direction: ReadDirection,
    ) -> Result<ReadAllResult> {
        self.inner.read_all(from, count, direction).await
    }

    async fn read_head_position(&self) -> Result<Position> {
        self.inner.read_head_position().await
    }

    async fn list_streams(&self, max_count: usize, cursor: Option<&str>) -> Result<ListStreamsResult> {
        self.inner.list_streams(max_count, cursor).await
    }

    async fn read_stream_metadata(&self, stream_id: &str) -> Result<StreamMetadataResult> {
        self.inner.read_stream_metadata(stream_id).await
    }

    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        options: SetStreamMetadataOptions,
    ) -> Result<SetStreamMetadataResult> {
        self.inner.set_stream_metadata(stream_id, expected, options).await
    }

    async fn delete_message(&self, stream_id: &str, message_id: Uuid) -> Result<()> {
        self.inner.delete_message(stream_id, message_id).await
    }

    async fn delete_stream(&self, stream_id: &str, expected: ExpectedVersion) -> Result<bool> {
        self.inner.delete_stream(stream_id, expected).await
    }

    async fn subscribe_to_stream(
        &self,
        stream_id: &str,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        validate_stream_id(stream_id)?;
        let source = StreamPageSource::new(self.clone(), stream_id);
        self.subscribe(stream_id, source, handler, options).await
    }

    async fn subscribe_to_all(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        let source = AllPageSource::new(self.clone());
        self.subscribe(ALL_TARGET, source, handler, options).await
    }

    async fn dispose(&self) -> Result<()> {
        self.inner.dispose().await
    }
}
