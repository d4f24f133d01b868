//! Payload serialization.
//!
//! The store persists message data and meta as strings. A
//! [`MessageSerializer`] is injected at construction time; the default is
//! [`JsonSerializer`].

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use crate::error::Result;

/// Encodes and decodes message payloads.
pub trait MessageSerializer: Send + Sync {
    fn serialize(&self, value: &Value) -> Result<String>;

    fn deserialize(&self, raw: &str) -> Result<Value>;
}

/// JSON serializer with optional timestamp revival.
///
/// With revival enabled, every string that parses as an RFC 3339 timestamp
/// is rewritten to canonical UTC form on the way out, so payload fields
/// deserialize straight into `DateTime<Utc>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer {
    revive_dates: bool,
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_date_revival() -> Self {
        Self { revive_dates: true }
    }
}

impl MessageSerializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> Result<String> {
        Ok(serde_json::to_string(value)?)
    }

    fn deserialize(&self, raw: &str) -> Result<Value> {
        let mut value: Value = serde_json::from_str(raw)?;
        if self.revive_dates {
            revive_dates(&mut value);
        }
        Ok(value)
    }
}

fn revive_dates(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Ok(parsed) = DateTime::parse_from_rfc3339(s) {
                *s = parsed
                    .with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::AutoSi, true);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(revive_dates),
        Value::Object(fields) => fields.values_mut().for_each(revive_dates),
        _ => {}
    }
}
