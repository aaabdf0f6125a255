use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::{RowReader, read_all_pages};
use crate::adapter::{PerItemSourceAdapter, SourceAdapter};
use crate::model::{HighlightSource, SyncItem, SyncStrategy, UnifiedHighlight};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppleBooksBook {
    pub book_id: String,
    pub title: String,
    pub author: String,
    /// `ibooks://` link; empty when unknown.
    #[serde(default)]
    pub ibooks_url: String,
    pub highlight_count: usize,
}

/// A row of the local annotation store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppleBooksHighlightRow {
    pub uuid: String,
    pub text: String,
    pub note: Option<String>,
    pub style: Option<i32>,
    pub date_added: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
    pub location: Option<String>,
}

impl From<AppleBooksHighlightRow> for UnifiedHighlight {
    fn from(row: AppleBooksHighlightRow) -> Self {
        UnifiedHighlight {
            uuid: row.uuid,
            text: row.text,
            note: row.note,
            color_index: row.style,
            date_added: row.date_added,
            date_modified: row.modified,
            location: row.location,
            source: HighlightSource::AppleBooks,
        }
    }
}

pub struct AppleBooksAdapter {
    book: AppleBooksBook,
    reader: Arc<dyn RowReader<AppleBooksHighlightRow>>,
    strategy: SyncStrategy,
    page_size: usize,
}

impl AppleBooksAdapter {
    pub fn new(book: AppleBooksBook, reader: Arc<dyn RowReader<AppleBooksHighlightRow>>) -> Self {
        Self {
            book,
            reader,
            strategy: SyncStrategy::SingleDatabase,
            page_size: 100,
        }
    }

    pub fn with_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl SourceAdapter for AppleBooksAdapter {
    fn source_key(&self) -> &str {
        HighlightSource::AppleBooks.as_str()
    }

    fn container_title(&self) -> &str {
        "SyncNos-AppleBooks"
    }

    fn highlight_source(&self) -> HighlightSource {
        HighlightSource::AppleBooks
    }

    fn sync_item(&self) -> SyncItem {
        SyncItem {
            item_id: self.book.book_id.clone(),
            title: self.book.title.clone(),
            author: self.book.author.clone(),
            url: Some(self.book.ibooks_url.clone()).filter(|u| !u.is_empty()),
            source: HighlightSource::AppleBooks,
            highlight_count: self.book.highlight_count,
        }
    }

    async fn fetch_highlights(&self) -> Result<Vec<UnifiedHighlight>> {
        let rows = read_all_pages(self.reader.as_ref(), &self.book.book_id, self.page_size).await?;
        Ok(rows.into_iter().map(UnifiedHighlight::from).collect())
    }

    fn supported_strategies(&self) -> &[SyncStrategy] {
        &[SyncStrategy::SingleDatabase, SyncStrategy::PerItemDatabase]
    }

    fn current_strategy(&self) -> SyncStrategy {
        self.strategy
    }

    fn as_per_item(&self) -> Option<&dyn PerItemSourceAdapter> {
        Some(self)
    }
}

impl PerItemSourceAdapter for AppleBooksAdapter {}
