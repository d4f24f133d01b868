//! Time-bounded cache of stream max ages for the expiry filter.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::error::Result;

struct CacheEntry {
    max_age: Option<i64>,
    expires_at: Instant,
}

/// Caches each stream's `max_age` for a fixed time to live.
pub struct MetadataCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Cached max age of `stream_id`, calling `load` on a miss.
    ///
    /// Expired entries are purged on every call. Failed loads are not cached.
    pub async fn max_age<F, Fut>(&self, stream_id: &str, load: F) -> Result<Option<i64>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<i64>>>,
    {
        let now = Instant::now();
        {
            let mut entries = self.entries.lock().await;
            entries.retain(|_, entry| entry.expires_at > now);
            if let Some(entry) = entries.get(stream_id) {
                return Ok(entry.max_age);
            }
        }

        let max_age = load().await?;
        self.entries.lock().await.insert(
            stream_id.to_string(),
            CacheEntry {
                max_age,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(max_age)
    }

    /// Drop the entry for `stream_id`, e.g. after its metadata changed.
    pub async fn invalidate(&self, stream_id: &str) {
        self.entries.lock().await.remove(stream_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}
