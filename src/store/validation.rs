//! Caller input validation.
//!
//! Every public engine operation validates its arguments before touching
//! the backend; failures surface as [`StoreError::InvalidParameter`].

use std::collections::HashSet;

use crate::error::{Result, StoreError};
use crate::message::{ExpectedVersion, NewStreamMessage, SetStreamMetadataOptions};
use crate::utils::ids::is_operational_stream;

/// Error constants for validation failures.
pub mod errmsg {
    pub const STREAM_ID_EMPTY: &str = "stream id cannot be empty";
    pub const STREAM_ID_RESERVED: &str = "stream ids starting with '$' are reserved";
    pub const COUNT_NOT_POSITIVE: &str = "count must be greater than zero";
    pub const EXPECTED_VERSION_INVALID: &str = "expected version must be -2, -1 or a non-negative version";
    pub const MESSAGE_TYPE_EMPTY: &str = "message type cannot be empty";
    pub const MESSAGE_ID_NIL: &str = "message id cannot be nil";
    pub const MESSAGE_ID_REPEATED: &str = "message id appears more than once in the batch";
    pub const RETENTION_NEGATIVE: &str = "retention limits cannot be negative";
    pub const CURSOR_INVALID: &str = "cursor is not a valid listing cursor";
}

fn invalid(message: &str) -> StoreError {
    StoreError::InvalidParameter(message.to_string())
}

/// Stream ids must be non-empty.
pub fn validate_stream_id(stream_id: &str) -> Result<()> {
    if stream_id.is_empty() {
        return Err(invalid(errmsg::STREAM_ID_EMPTY));
    }
    Ok(())
}

/// Callers may only write to non-operational streams.
pub fn validate_writable_stream_id(stream_id: &str) -> Result<()> {
    validate_stream_id(stream_id)?;
    if is_operational_stream(stream_id) {
        return Err(StoreError::InvalidParameter(format!(
            "{}: {}",
            errmsg::STREAM_ID_RESERVED,
            stream_id
        )));
    }
    Ok(())
}

pub fn validate_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(invalid(errmsg::COUNT_NOT_POSITIVE));
    }
    Ok(())
}

pub fn validate_expected_version(expected: ExpectedVersion) -> Result<()> {
    match expected {
        ExpectedVersion::Exact(v) if v < 0 => Err(invalid(errmsg::EXPECTED_VERSION_INVALID)),
        _ => Ok(()),
    }
}

/// Messages need an id and a type; ids must be unique within the batch.
pub fn validate_messages(messages: &[NewStreamMessage]) -> Result<()> {
    let mut seen = HashSet::with_capacity(messages.len());
    for message in messages {
        if message.message_id.is_nil() {
            return Err(invalid(errmsg::MESSAGE_ID_NIL));
        }
        if message.message_type.is_empty() {
            return Err(invalid(errmsg::MESSAGE_TYPE_EMPTY));
        }
        if !seen.insert(message.message_id) {
            return Err(StoreError::InvalidParameter(format!(
                "{}: {}",
                errmsg::MESSAGE_ID_REPEATED,
                message.message_id
            )));
        }
    }
    Ok(())
}

pub fn validate_metadata_options(options: &SetStreamMetadataOptions) -> Result<()> {
    let negative = [options.max_age, options.max_count, options.truncate_before]
        .into_iter()
        .flatten()
        .any(|v| v < 0);
    if negative {
        return Err(invalid(errmsg::RETENTION_NEGATIVE));
    }
    Ok(())
}

/// Parse a listing cursor; `None` starts from the beginning.
pub fn parse_cursor(cursor: Option<&str>) -> Result<i64> {
    match cursor {
        None | Some("") => Ok(0),
        Some(raw) => raw
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .ok_or_else(|| invalid(errmsg::CURSOR_INVALID)),
    }
}
