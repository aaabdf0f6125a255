use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{RowReader, read_all_pages, rich_text};
use crate::adapter::SourceAdapter;
use crate::model::{HighlightSource, SyncItem, UnifiedHighlight};
use crate::remote::PropertyMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedaoBook {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub highlight_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedaoNoteRow {
    pub note_id: String,
    /// The underlined passage.
    pub note_line: String,
    pub note: Option<String>,
    /// Unix seconds; zero when unknown.
    pub create_time: i64,
    pub update_time: i64,
    pub chapter_title: Option<String>,
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    if secs > 0 { DateTime::from_timestamp(secs, 0) } else { None }
}

impl From<DedaoNoteRow> for UnifiedHighlight {
    fn from(row: DedaoNoteRow) -> Self {
        UnifiedHighlight {
            uuid: row.note_id,
            text: row.note_line,
            note: row.note.filter(|n| !n.is_empty()),
            // no colour information; everything renders with the single palette entry
            color_index: Some(0),
            date_added: timestamp(row.create_time),
            date_modified: timestamp(row.update_time),
            location: row.chapter_title,
            source: HighlightSource::Dedao,
        }
    }
}

pub struct DedaoAdapter {
    book: DedaoBook,
    reader: Arc<dyn RowReader<DedaoNoteRow>>,
    page_size: usize,
}

impl DedaoAdapter {
    pub fn new(book: DedaoBook, reader: Arc<dyn RowReader<DedaoNoteRow>>) -> Self {
        Self {
            book,
            reader,
            page_size: 100,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }
}

#[async_trait]
impl SourceAdapter for DedaoAdapter {
    fn source_key(&self) -> &str {
        HighlightSource::Dedao.as_str()
    }

    fn container_title(&self) -> &str {
        "SyncNos-Dedao"
    }

    fn highlight_source(&self) -> HighlightSource {
        HighlightSource::Dedao
    }

    fn sync_item(&self) -> SyncItem {
        SyncItem {
            item_id: self.book.book_id.clone(),
            title: self.book.title.clone(),
            author: self.book.author.clone(),
            url: None,
            source: HighlightSource::Dedao,
            highlight_count: self.book.highlight_count,
        }
    }

    async fn fetch_highlights(&self) -> Result<Vec<UnifiedHighlight>> {
        let rows = read_all_pages(self.reader.as_ref(), &self.book.book_id, self.page_size).await?;
        Ok(rows.into_iter().map(UnifiedHighlight::from).collect())
    }

    fn additional_schema_fields(&self) -> PropertyMap {
        let mut fields = PropertyMap::new();
        fields.insert("Author".into(), json!({ "rich_text": {} }));
        fields.insert("Dedao Book ID".into(), json!({ "rich_text": {} }));
        fields
    }

    fn additional_item_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        if !self.book.author.is_empty() {
            properties.insert("Author".into(), rich_text(&self.book.author));
        }
        properties.insert("Dedao Book ID".into(), rich_text(&self.book.book_id));
        properties
    }

    /// The server bumps `update_time` on every edit.
    fn prefers_modification_token(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::change_token;

    fn row(update_time: i64) -> DedaoNoteRow {
        DedaoNoteRow {
            note_id: "dd-1".to_string(),
            note_line: "passage".to_string(),
            note: Some(String::new()),
            create_time: 1_650_000_000,
            update_time,
            chapter_title: None,
        }
    }

    #[test]
    fn test_conversion() {
        let highlight = UnifiedHighlight::from(row(0));
        assert_eq!(highlight.note, None);
        assert_eq!(highlight.date_modified, None);
        assert_eq!(highlight.color_index, Some(0));
        assert_eq!(highlight.date_added.map(|d| d.timestamp()), Some(1_650_000_000));
    }

    #[test]
    fn test_update_time_drives_change_token() {
        let reader = Arc::new(crate::sources::testing::VecReader::<DedaoNoteRow>::new(Vec::new()));
        let book = DedaoBook {
            book_id: "enid".to_string(),
            title: "Title".to_string(),
            author: "Author".to_string(),
            highlight_count: 1,
        };
        let adapter = DedaoAdapter::new(book, reader);
        assert!(adapter.prefers_modification_token());

        let token = change_token(&row(1_650_000_100).into(), adapter.source_key(), true);
        assert_eq!(token, "m1650000100000");
        let fallback = change_token(&row(0).into(), adapter.source_key(), true);
        assert_eq!(fallback.len(), 16);
    }
}
