//! Stream subscription source.

use async_trait::async_trait;

use super::{Page, PageSource};
use crate::error::Result;
use crate::message::{ReadDirection, ReadFrom};
use crate::store::StreamStore;

/// Reads one stream forward; the cursor is a stream version.
pub struct StreamPageSource<S> {
    store: S,
    stream_id: String,
}

impl<S> StreamPageSource<S> {
    pub fn new(store: S, stream_id: impl Into<String>) -> Self {
        Self {
            store,
            stream_id: stream_id.into(),
        }
    }
}

#[async_trait]
impl<S: StreamStore + 'static> PageSource for StreamPageSource<S> {
    async fn read_page(&self, cursor: i64, count: usize) -> Result<Page> {
        let result = self
            .store
            .read_stream(&self.stream_id, ReadFrom::At(cursor), count, ReadDirection::Forward)
            .await?;
        Ok(Page {
            messages: result.messages,
            next: result.next_version,
            is_end: result.is_end,
        })
    }

    /// A missing stream starts at version 0.
    async fn end_cursor(&self) -> Result<i64> {
        let result = self
            .store
            .read_stream(&self.stream_id, ReadFrom::Start, 1, ReadDirection::Forward)
            .await?;
        Ok(result.stream_version + 1)
    }
}
