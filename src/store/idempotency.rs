//! Append admission rules: expected-version check plus idempotent replay
//! detection.
//!
//! A replay is recognized when the incoming batch lines up, id by id, with
//! messages already stored in the stream and adds nothing new. A batch that
//! matches a prefix and then diverges, or that runs past the stored tail,
//! is a conflict.

use std::collections::HashSet;

use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::message::{ExpectedVersion, StreamVersion};

/// What an append should do once admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendDecision {
    /// Insert the batch after the current version.
    Append,
    /// The batch was already applied; return the current state unchanged.
    AlreadyApplied,
}

/// Decide whether a batch may be appended.
///
/// `stored` holds the stream's surviving messages as `(version, id)` in
/// ascending version order.
pub fn check_append(
    stream_id: &str,
    expected: ExpectedVersion,
    current_version: StreamVersion,
    stored: &[(StreamVersion, Uuid)],
    incoming: &[Uuid],
) -> Result<AppendDecision> {
    match expected {
        ExpectedVersion::Any => check_any(stream_id, stored, incoming),
        ExpectedVersion::Empty => {
            check_exact(stream_id, expected, ExpectedVersion::EMPTY, current_version, stored, incoming)
        }
        ExpectedVersion::Exact(v) => check_exact(stream_id, expected, v, current_version, stored, incoming),
    }
}

fn check_any(
    stream_id: &str,
    stored: &[(StreamVersion, Uuid)],
    incoming: &[Uuid],
) -> Result<AppendDecision> {
    let Some(first) = incoming.first() else {
        return Ok(AppendDecision::Append);
    };

    if let Some(start) = stored.iter().position(|(_, id)| id == first) {
        return if is_replay(&stored[start..], incoming) {
            Ok(AppendDecision::AlreadyApplied)
        } else {
            Err(StoreError::wrong_expected_version(stream_id, ExpectedVersion::ANY))
        };
    }

    reject_known_ids(stream_id, stored, incoming)?;
    Ok(AppendDecision::Append)
}

fn check_exact(
    stream_id: &str,
    expected: ExpectedVersion,
    version: StreamVersion,
    current_version: StreamVersion,
    stored: &[(StreamVersion, Uuid)],
    incoming: &[Uuid],
) -> Result<AppendDecision> {
    if version > current_version {
        return Err(StoreError::wrong_expected_version(stream_id, expected.as_i64()));
    }

    if version == current_version {
        reject_known_ids(stream_id, stored, incoming)?;
        return Ok(AppendDecision::Append);
    }

    let tail_start = stored.partition_point(|(v, _)| *v <= version);
    if is_replay(&stored[tail_start..], incoming) {
        Ok(AppendDecision::AlreadyApplied)
    } else {
        Err(StoreError::wrong_expected_version(stream_id, expected.as_i64()))
    }
}

/// The incoming batch equals the start of `tail`.
fn is_replay(tail: &[(StreamVersion, Uuid)], incoming: &[Uuid]) -> bool {
    incoming.len() <= tail.len()
        && tail
            .iter()
            .zip(incoming)
            .all(|((_, stored_id), incoming_id)| stored_id == incoming_id)
}

fn reject_known_ids(
    stream_id: &str,
    stored: &[(StreamVersion, Uuid)],
    incoming: &[Uuid],
) -> Result<()> {
    let known: HashSet<&Uuid> = stored.iter().map(|(_, id)| id).collect();
    match incoming.iter().find(|id| known.contains(id)) {
        Some(id) => Err(StoreError::DuplicateMessage {
            stream_id: stream_id.to_string(),
            message_id: *id,
        }),
        None => Ok(()),
    }
}
