//! Store configuration.
//!
//! Everything a store needs at construction time that can be expressed as
//! data. Loaded from YAML files and/or environment variables; code-level
//! injectables (serializer, clock) go through the engine builder instead.

mod storage;

pub use storage::{NotifierConfig, PostgresConfig, ReadingConfig, RetryConfig};

use std::time::Duration;

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "streamstore.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "STREAMSTORE_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STREAMSTORE";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "STREAMSTORE_LOG";

/// Stream store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Postgres backend connection settings.
    pub postgres: PostgresConfig,
    /// Change-notification strategy for subscriptions.
    pub notifier: NotifierConfig,
    /// Await retention scavenging before returning from appends.
    pub scavenge_synchronously: bool,
    pub reading: ReadingConfig,
    /// Delay before re-reading a global page that shows a position gap.
    pub gap_reload_delay_ms: u64,
    /// How many times a gapped page is re-read.
    pub gap_reload_times: u32,
    pub append_retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            notifier: NotifierConfig::default(),
            scavenge_synchronously: false,
            reading: ReadingConfig::default(),
            gap_reload_delay_ms: 5_000,
            gap_reload_times: 1,
            append_retry: RetryConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `streamstore.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ::config::ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Config for tests: push notifications and synchronous scavenging so
    /// assertions do not race background work.
    pub fn for_test() -> Self {
        Self {
            notifier: NotifierConfig::Push {
                keep_alive_interval_ms: None,
            },
            scavenge_synchronously: true,
            gap_reload_delay_ms: 50,
            ..Self::default()
        }
    }

    pub fn gap_reload_delay(&self) -> Duration {
        Duration::from_millis(self.gap_reload_delay_ms)
    }

    pub fn metadata_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.reading.metadata_cache_ttl_secs)
    }
}
