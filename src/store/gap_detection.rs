//! Transient position gap detection for global reads.
//!
//! Positions are reserved when a transaction inserts and become visible
//! when it commits, so a reader near the head of the log can observe a
//! hole that fills a moment later. When the last page of a forward read
//! shows one, it is re-read after a short delay.

use std::future::Future;
use std::time::Duration;

use tracing::trace;

use crate::error::Result;
use crate::message::{Position, ReadAllResult, StreamMessage};

/// True when the page does not start at `from` or skips a position.
pub fn has_gap(from: Position, messages: &[StreamMessage]) -> bool {
    let Some(first) = messages.first() else {
        return false;
    };
    if first.position != from {
        return true;
    }
    messages
        .windows(2)
        .any(|pair| pair[0].position + 1 != pair[1].position)
}

/// Read a forward page of the global log, re-reading it while it shows a gap.
///
/// Only the last page is checked, and only when it holds more than one
/// message. After `reload_times` re-reads the last result is returned
/// whether or not the gap closed.
pub async fn read_with_gap_detection<F, Fut>(
    from: Position,
    reload_delay: Duration,
    reload_times: u32,
    mut read: F,
) -> Result<ReadAllResult>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ReadAllResult>>,
{
    let mut result = read().await?;
    if !result.is_end || result.messages.len() <= 1 {
        return Ok(result);
    }

    let mut attempt = 0;
    while attempt < reload_times && has_gap(from, &result.messages) {
        attempt += 1;
        trace!(
            from,
            attempt,
            reload_times,
            delay = ?reload_delay,
            "Gap detected in positions, reloading"
        );
        tokio::time::sleep(reload_delay).await;
        result = read().await?;
    }
    Ok(result)
}
