//! In-memory storage backend.
//!
//! Reference implementation of [`StorageBackend`] used by tests and
//! embedded setups. All state sits behind a single lock, so every
//! operation is atomic and positions never have gaps.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    AppendOutcome, EncodedMessage, ListedStream, RetentionPolicy, StorageBackend, StoredMessage,
    StreamInfo, StreamPage,
};
use crate::error::{Result, StoreError};
use crate::message::{ExpectedVersion, Position, ReadDirection, StreamVersion};
use crate::notifier::{InMemoryNotifier, Notifier};
use crate::store::idempotency::{check_append, AppendDecision};
use crate::utils::ids::{metadata_stream_id, DELETED_STREAM_ID};

struct StreamRecord {
    internal_id: i64,
    version: StreamVersion,
    position: Position,
    retention: RetentionPolicy,
    /// Surviving messages in version order.
    messages: Vec<StoredMessage>,
}

impl StreamRecord {
    fn info(&self, stream_id: &str) -> StreamInfo {
        StreamInfo {
            stream_id: stream_id.to_string(),
            stream_version: self.version,
            stream_position: self.position,
            retention: self.retention,
        }
    }

    fn outcome(&self) -> AppendOutcome {
        AppendOutcome {
            stream_version: self.version,
            stream_position: self.position,
            retention: self.retention,
        }
    }
}

#[derive(Default)]
struct State {
    streams: HashMap<String, StreamRecord>,
    /// Every surviving message, keyed by global position.
    log: BTreeMap<Position, StoredMessage>,
    /// Stream ids by internal id, for listing.
    created: BTreeMap<i64, String>,
    next_position: Position,
    next_internal_id: i64,
}

impl State {
    fn append(
        &mut self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<EncodedMessage>,
        created_at: DateTime<Utc>,
    ) -> Result<AppendOutcome> {
        if !self.streams.contains_key(stream_id) {
            if let ExpectedVersion::Exact(v) = expected {
                if v >= 0 {
                    return Err(StoreError::wrong_expected_version(stream_id, v));
                }
            }
            self.create_stream(stream_id);
        }

        let record = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| StoreError::Backend(format!("stream {} vanished", stream_id)))?;

        let stored: Vec<(StreamVersion, Uuid)> = record
            .messages
            .iter()
            .map(|m| (m.stream_version, m.message_id))
            .collect();
        let incoming: Vec<Uuid> = messages.iter().map(|m| m.message_id).collect();

        if check_append(stream_id, expected, record.version, &stored, &incoming)?
            == AppendDecision::AlreadyApplied
        {
            debug!(stream_id, "Append already applied");
            return Ok(record.outcome());
        }

        for message in messages {
            let position = self.next_position;
            self.next_position += 1;
            record.version += 1;
            record.position = position;

            let stored = StoredMessage {
                stream_id: stream_id.to_string(),
                message_id: message.message_id,
                message_type: message.message_type,
                stream_version: record.version,
                position,
                created_at,
                data: message.data,
                meta: message.meta,
            };
            self.log.insert(position, stored.clone());
            record.messages.push(stored);
        }

        Ok(record.outcome())
    }

    /// Create an empty stream, inheriting retention from its metadata stream.
    fn create_stream(&mut self, stream_id: &str) {
        self.next_internal_id += 1;
        let retention = self
            .streams
            .get(&metadata_stream_id(stream_id))
            .map(|meta| meta.retention)
            .unwrap_or_default();

        self.created.insert(self.next_internal_id, stream_id.to_string());
        self.streams.insert(
            stream_id.to_string(),
            StreamRecord {
                internal_id: self.next_internal_id,
                version: -1,
                position: -1,
                retention,
                messages: Vec::new(),
            },
        );
    }

    fn remove_messages(&mut self, stream_id: &str, ids: &HashSet<Uuid>) {
        if let Some(record) = self.streams.get_mut(stream_id) {
            let log = &mut self.log;
            record.messages.retain(|m| {
                if ids.contains(&m.message_id) {
                    log.remove(&m.position);
                    false
                } else {
                    true
                }
            });
        }
    }
}

/// Backend keeping all streams in process memory.
pub struct InMemoryBackend {
    state: RwLock<State>,
    notifier: Arc<InMemoryNotifier>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            notifier: Arc::new(InMemoryNotifier::new()),
        }
    }

    fn now(created_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
        created_at.unwrap_or_else(Utc::now)
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<EncodedMessage>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        let appended = !messages.is_empty();
        let outcome = self
            .state
            .write()
            .await
            .append(stream_id, expected, messages, Self::now(created_at))?;
        if appended {
            self.notifier.invoke();
        }
        Ok(outcome)
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: StreamVersion,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Option<StreamPage>> {
        let state = self.state.read().await;
        let Some(record) = state.streams.get(stream_id) else {
            return Ok(None);
        };

        let messages = match direction {
            ReadDirection::Forward => record
                .messages
                .iter()
                .filter(|m| m.stream_version >= from_version)
                .take(limit)
                .cloned()
                .collect(),
            ReadDirection::Backward => record
                .messages
                .iter()
                .rev()
                .filter(|m| m.stream_version <= from_version)
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(Some(StreamPage {
            info: record.info(stream_id),
            messages,
        }))
    }

    async fn read_all(
        &self,
        from_position: Position,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Vec<StoredMessage>> {
        let state = self.state.read().await;
        let messages = match direction {
            ReadDirection::Forward => state
                .log
                .range(from_position..)
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect(),
            ReadDirection::Backward => state
                .log
                .range(..=from_position)
                .rev()
                .take(limit)
                .map(|(_, m)| m.clone())
                .collect(),
        };
        Ok(messages)
    }

    async fn read_head_position(&self) -> Result<Position> {
        let state = self.state.read().await;
        Ok(state.log.keys().next_back().copied().unwrap_or(-1))
    }

    async fn list_streams(&self, max_count: usize, after_internal_id: i64) -> Result<Vec<ListedStream>> {
        let state = self.state.read().await;
        Ok(state
            .created
            .range(after_internal_id.saturating_add(1)..)
            .take(max_count)
            .map(|(internal_id, stream_id)| ListedStream {
                stream_id: stream_id.clone(),
                internal_id: *internal_id,
            })
            .collect())
    }

    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        message: EncodedMessage,
        retention: RetentionPolicy,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        let meta_stream_id = metadata_stream_id(stream_id);
        let mut outcome = {
            let mut state = self.state.write().await;
            let outcome = state.append(&meta_stream_id, expected, vec![message], Self::now(created_at))?;
            for id in [meta_stream_id.as_str(), stream_id] {
                if let Some(record) = state.streams.get_mut(id) {
                    record.retention = retention;
                }
            }
            outcome
        };
        self.notifier.invoke();
        outcome.retention = retention;
        Ok(outcome)
    }

    async fn delete_messages(&self, stream_id: &str, message_ids: &[Uuid]) -> Result<()> {
        let ids: HashSet<Uuid> = message_ids.iter().copied().collect();
        self.state.write().await.remove_messages(stream_id, &ids);
        Ok(())
    }

    async fn delete_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        tombstone: EncodedMessage,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        {
            let mut state = self.state.write().await;
            let Some(record) = state.streams.get(stream_id) else {
                return Ok(false);
            };

            let matches = match expected {
                ExpectedVersion::Any => true,
                ExpectedVersion::Empty => false,
                ExpectedVersion::Exact(v) => v == record.version,
            };
            if !matches {
                return Err(StoreError::wrong_expected_version(stream_id, expected.as_i64()));
            }

            if let Some(record) = state.streams.remove(stream_id) {
                for message in &record.messages {
                    state.log.remove(&message.position);
                }
                state.created.remove(&record.internal_id);
            }

            state.append(
                DELETED_STREAM_ID,
                ExpectedVersion::Any,
                vec![tombstone],
                Self::now(created_at),
            )?;
        }
        self.notifier.invoke();
        Ok(true)
    }

    async fn scavengable_message_ids(
        &self,
        stream_id: &str,
        retention: &RetentionPolicy,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Uuid>> {
        let state = self.state.read().await;
        let Some(record) = state.streams.get(stream_id) else {
            return Ok(Vec::new());
        };
        let now = Self::now(now);

        let mut seen = HashSet::new();
        let mut ids = Vec::new();
        let mut add = |id: Uuid| {
            if seen.insert(id) {
                ids.push(id);
            }
        };

        if let Some(max_count) = retention.max_count.filter(|c| *c > 0) {
            let keep = usize::try_from(max_count).unwrap_or(usize::MAX);
            let excess = record.messages.len().saturating_sub(keep);
            record.messages[..excess].iter().for_each(|m| add(m.message_id));
        }

        if let Some(max_age) = retention.max_age.filter(|a| *a > 0) {
            let cutoff = now - chrono::Duration::seconds(max_age);
            record
                .messages
                .iter()
                .filter(|m| m.created_at < cutoff)
                .for_each(|m| add(m.message_id));
        }

        if let Some(truncate_before) = retention.truncate_before {
            record
                .messages
                .iter()
                .filter(|m| m.stream_version < truncate_before)
                .for_each(|m| add(m.message_id));
        }

        Ok(ids)
    }

    fn create_push_notifier(&self, _keep_alive: Option<Duration>) -> Arc<dyn Notifier> {
        self.notifier.clone()
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
