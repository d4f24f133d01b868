//! Backend, notifier and read-path configuration types.

use serde::Deserialize;

/// PostgreSQL-specific configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// PostgreSQL connection URI.
    pub uri: String,
    /// Schema holding the store's tables and functions.
    pub schema: String,
    pub min_connections: u32,
    pub max_connections: u32,
    /// Per-attempt connect timeout.
    pub connect_timeout_ms: u64,
    /// Connection attempts before giving up at startup.
    pub connect_retries: u32,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            uri: "postgres://localhost:5432/streamstore".to_string(),
            schema: "public".to_string(),
            min_connections: 0,
            max_connections: 10,
            connect_timeout_ms: 5_000,
            connect_retries: 10,
        }
    }
}

/// Change-notification strategy (discriminated union).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifierConfig {
    /// Compare the head position on a fixed interval.
    Poll {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
    },
    /// Backend-native push notifications (Postgres LISTEN/NOTIFY).
    Push {
        /// Run a keep-alive query on the listening connection this often.
        #[serde(default)]
        keep_alive_interval_ms: Option<u64>,
    },
}

fn default_poll_interval_ms() -> u64 {
    500
}

impl Default for NotifierConfig {
    fn default() -> Self {
        NotifierConfig::Poll {
            interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Read-path configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    /// Hide messages older than their stream's max age and purge them.
    pub filter_expired_messages: bool,
    /// How long stream metadata stays cached for expiry filtering.
    pub metadata_cache_ttl_secs: u64,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            filter_expired_messages: false,
            metadata_cache_ttl_secs: 60,
        }
    }
}

/// Backoff used when an `ExpectedVersion::Any` append loses a race.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_times: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 2,
            max_delay_ms: 50,
            max_times: 10,
        }
    }
}
