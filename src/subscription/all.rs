//! All-subscription source.

use async_trait::async_trait;

use super::{Page, PageSource};
use crate::error::Result;
use crate::message::{ReadDirection, ReadFrom};
use crate::store::StreamStore;

/// Reads the global log forward; the cursor is a position.
pub struct AllPageSource<S> {
    store: S,
}

impl<S> AllPageSource<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }
}

#[async_trait]
impl<S: StreamStore + 'static> PageSource for AllPageSource<S> {
    async fn read_page(&self, cursor: i64, count: usize) -> Result<Page> {
        let result = self
            .store
            .read_all(ReadFrom::At(cursor), count, ReadDirection::Forward)
            .await?;
        Ok(Page {
            messages: result.messages,
            next: result.next_position,
            is_end: result.is_end,
        })
    }

    async fn end_cursor(&self) -> Result<i64> {
        Ok(self.store.read_head_position().await? + 1)
    }
}
