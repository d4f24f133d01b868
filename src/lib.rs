//! Streamstore - append-only multi-stream message store
//!
//! Streams with optimistic concurrency and idempotent appends, a global
//! log ordering every message, per-stream retention with scavenging, and
//! live subscriptions over a stream or the whole log. Runs in memory or
//! on PostgreSQL.

pub mod config;
pub mod error;
pub mod message;
pub mod notifier;
pub mod serialization;
pub mod storage;
pub mod store;
pub mod subscription;
pub mod utils;

pub use config::StoreConfig;
pub use error::{HandlerError, Result, StoreError};
pub use message::{
    AppendResult, ExpectedVersion, ListStreamsResult, NewStreamMessage, Position, ReadAllResult,
    ReadDirection, ReadFrom, ReadStreamResult, SetStreamMetadataOptions, SetStreamMetadataResult,
    StreamMessage, StreamMetadataResult, StreamVersion,
};
pub use store::{InMemoryStreamStore, StreamStore, StreamStoreEngine};
pub use subscription::{MessageHandler, SubscribeAt, Subscription, SubscriptionOptions};

#[cfg(feature = "postgres")]
pub use store::PostgresStreamStore;
