//! Read-side expiry filtering.
//!
//! Scavenging removes expired messages eventually; until it runs, reads
//! hide messages whose stream `max_age` has elapsed and hand them back
//! so the engine can purge them.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::message::StreamMessage;
use crate::utils::ids::is_operational_stream;

/// Messages split into those still visible and those past their max age.
#[derive(Debug, Default)]
pub struct ExpiryPartition {
    pub valid: Vec<StreamMessage>,
    pub expired: Vec<StreamMessage>,
}

impl ExpiryPartition {
    /// Expired message ids grouped by stream, in read order.
    pub fn expired_by_stream(&self) -> HashMap<String, Vec<Uuid>> {
        let mut grouped: HashMap<String, Vec<Uuid>> = HashMap::new();
        for message in &self.expired {
            grouped
                .entry(message.stream_id.clone())
                .or_default()
                .push(message.message_id);
        }
        grouped
    }
}

/// Split `messages` by expiry.
///
/// Each message comes paired with its stream's max age in seconds.
/// Operational streams and streams without a positive max age never expire.
/// A message expires once `created_at + max_age <= now`.
pub fn filter_expired(
    messages: Vec<(StreamMessage, Option<i64>)>,
    now: DateTime<Utc>,
) -> ExpiryPartition {
    let mut partition = ExpiryPartition::default();
    for (message, max_age) in messages {
        let max_age = max_age.filter(|age| *age > 0);
        match max_age {
            Some(age) if !is_operational_stream(&message.stream_id) => {
                if message.created_at + Duration::seconds(age) > now {
                    partition.valid.push(message);
                } else {
                    partition.expired.push(message);
                }
            }
            _ => partition.valid.push(message),
        }
    }
    partition
}
