//! Message, version and result types of the stream store contract.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;

/// Zero-based position of a message within its stream. `-1` means empty.
pub type StreamVersion = i64;

/// Store-wide position of a message in the global log. `-1` means empty.
pub type Position = i64;

/// Write precondition for an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpectedVersion {
    /// No version check; idempotency still applies.
    Any,
    /// The stream must not exist or be empty.
    Empty,
    /// The stream's current version must equal this.
    Exact(StreamVersion),
}

impl ExpectedVersion {
    pub const ANY: i64 = -2;
    pub const EMPTY: i64 = -1;

    /// Wire value: `-2` for any, `-1` for empty, the version otherwise.
    pub fn as_i64(self) -> i64 {
        match self {
            ExpectedVersion::Any => Self::ANY,
            ExpectedVersion::Empty => Self::EMPTY,
            ExpectedVersion::Exact(v) => v,
        }
    }
}

impl From<StreamVersion> for ExpectedVersion {
    fn from(value: StreamVersion) -> Self {
        match value {
            ExpectedVersion::ANY => ExpectedVersion::Any,
            ExpectedVersion::EMPTY => ExpectedVersion::Empty,
            v => ExpectedVersion::Exact(v),
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpectedVersion::Any => write!(f, "any"),
            ExpectedVersion::Empty => write!(f, "empty"),
            ExpectedVersion::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Where a read starts, inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadFrom {
    /// First message of the stream or log.
    Start,
    /// Current tail of the stream or log.
    End,
    /// A specific version (stream reads) or position (global reads).
    At(i64),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadDirection {
    #[default]
    Forward,
    Backward,
}

/// A message to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStreamMessage {
    pub message_id: Uuid,
    pub message_type: String,
    pub data: Value,
    pub meta: Option<Value>,
}

impl NewStreamMessage {
    pub fn new(message_id: Uuid, message_type: impl Into<String>, data: Value) -> Self {
        Self {
            message_id,
            message_type: message_type.into(),
            data,
            meta: None,
        }
    }

    /// Build a message from any serializable payload.
    pub fn from_data<T: Serialize>(
        message_id: Uuid,
        message_type: impl Into<String>,
        data: &T,
    ) -> Result<Self> {
        Ok(Self::new(message_id, message_type, serde_json::to_value(data)?))
    }

    pub fn with_meta(mut self, meta: Value) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// A stored message as returned by reads and subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    pub stream_id: String,
    pub message_id: Uuid,
    pub message_type: String,
    pub stream_version: StreamVersion,
    pub position: Position,
    pub created_at: DateTime<Utc>,
    pub data: Value,
    pub meta: Value,
}

impl StreamMessage {
    /// Deserialize the payload into a typed value.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.data)?)
    }

    pub fn meta_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(T::deserialize(&self.meta)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendResult {
    pub stream_version: StreamVersion,
    pub stream_position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadStreamResult {
    pub stream_id: String,
    /// Version of the stream's latest message at read time.
    pub stream_version: StreamVersion,
    /// Global position of the stream's latest message at read time.
    pub stream_position: Position,
    /// Version to pass to the next read in the same direction.
    pub next_version: StreamVersion,
    pub is_end: bool,
    pub messages: Vec<StreamMessage>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadAllResult {
    /// Position to pass to the next read in the same direction.
    pub next_position: Position,
    pub is_end: bool,
    pub messages: Vec<StreamMessage>,
}

/// Retention and user metadata of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMetadataResult {
    pub stream_id: String,
    /// Version of the metadata stream; `-1` when no metadata was ever set.
    pub metadata_stream_version: StreamVersion,
    pub metadata: Option<Value>,
    /// Seconds after which messages expire.
    pub max_age: Option<i64>,
    /// Number of most recent messages to keep.
    pub max_count: Option<i64>,
    /// Messages with a lower version are scavenged.
    pub truncate_before: Option<StreamVersion>,
}

impl StreamMetadataResult {
    pub(crate) fn none(stream_id: &str) -> Self {
        Self {
            stream_id: stream_id.to_string(),
            metadata_stream_version: -1,
            metadata: None,
            max_age: None,
            max_count: None,
            truncate_before: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetStreamMetadataOptions {
    pub metadata: Option<Value>,
    pub max_age: Option<i64>,
    pub max_count: Option<i64>,
    pub truncate_before: Option<StreamVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetStreamMetadataResult {
    /// Version of the metadata stream after the write.
    pub current_version: StreamVersion,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListStreamsResult {
    pub stream_ids: Vec<String>,
    /// Opaque cursor for the next page.
    pub cursor: String,
}

/// Payload of a metadata stream message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MetadataPayload {
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub max_age: Option<i64>,
    #[serde(default)]
    pub max_count: Option<i64>,
    #[serde(default)]
    pub truncate_before: Option<StreamVersion>,
}

impl MetadataPayload {
    /// Zero limits mean "disabled" and are stored as null.
    pub fn from_options(options: &SetStreamMetadataOptions) -> Self {
        Self {
            metadata: options
                .metadata
                .clone()
                .unwrap_or_else(|| Value::Object(Default::default())),
            max_age: options.max_age.filter(|v| *v > 0),
            max_count: options.max_count.filter(|v| *v > 0),
            truncate_before: options.truncate_before,
        }
    }

    pub fn into_result(self, stream_id: &str, metadata_stream_version: StreamVersion) -> StreamMetadataResult {
        StreamMetadataResult {
            stream_id: stream_id.to_string(),
            metadata_stream_version,
            metadata: Some(self.metadata),
            max_age: self.max_age.filter(|v| *v > 0),
            max_count: self.max_count.filter(|v| *v > 0),
            truncate_before: self.truncate_before,
        }
    }
}

/// Payload of a stream deletion tombstone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamDeletedPayload {
    pub stream_id: String,
}
