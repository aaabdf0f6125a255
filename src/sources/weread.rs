use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{RowReader, from_unix_seconds, read_all_pages, rich_text};
use crate::adapter::SourceAdapter;
use crate::model::{HighlightSource, SyncItem, UnifiedHighlight};
use crate::remote::PropertyMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeReadBook {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub category: Option<String>,
    pub highlight_count: usize,
}

/// A bookmark with the reviews written on it already merged in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeReadBookmarkRow {
    pub highlight_id: String,
    pub text: String,
    pub note: Option<String>,
    #[serde(default)]
    pub review_contents: Vec<String>,
    pub color_index: Option<i32>,
    /// Unix seconds.
    pub timestamp: Option<f64>,
    pub chapter_title: Option<String>,
}

impl From<WeReadBookmarkRow> for UnifiedHighlight {
    fn from(row: WeReadBookmarkRow) -> Self {
        let note = if row.review_contents.is_empty() {
            row.note
        } else {
            Some(row.review_contents.join("\n"))
        };
        UnifiedHighlight {
            uuid: row.highlight_id,
            text: row.text,
            note,
            color_index: row.color_index,
            date_added: row.timestamp.and_then(from_unix_seconds),
            date_modified: None,
            location: row.chapter_title,
            source: HighlightSource::WeRead,
        }
    }
}

pub struct WeReadAdapter {
    book: WeReadBook,
    reader: Arc<dyn RowReader<WeReadBookmarkRow>>,
    page_size: usize,
}

impl WeReadAdapter {
    pub fn new(book: WeReadBook, reader: Arc<dyn RowReader<WeReadBookmarkRow>>) -> Self {
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
impl SourceAdapter for WeReadAdapter {
    fn source_key(&self) -> &str {
        HighlightSource::WeRead.as_str()
    }

    fn container_title(&self) -> &str {
        "SyncNos-WeRead"
    }

    fn highlight_source(&self) -> HighlightSource {
        HighlightSource::WeRead
    }

    fn sync_item(&self) -> SyncItem {
        SyncItem {
            item_id: self.book.book_id.clone(),
            title: self.book.title.clone(),
            author: self.book.author.clone(),
            url: None,
            source: HighlightSource::WeRead,
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
        fields.insert("WeRead Book ID".into(), json!({ "rich_text": {} }));
        fields.insert("Category".into(), json!({ "rich_text": {} }));
        fields
    }

    fn additional_item_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        if !self.book.author.is_empty() {
            properties.insert("Author".into(), rich_text(&self.book.author));
        }
        properties.insert("WeRead Book ID".into(), rich_text(&self.book.book_id));
        if let Some(category) = self.book.category.as_deref().filter(|c| !c.is_empty()) {
            properties.insert("Category".into(), rich_text(category));
        }
        properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bookmark(reviews: &[&str]) -> WeReadBookmarkRow {
        WeReadBookmarkRow {
            highlight_id: "wr-1".to_string(),
            text: "line".to_string(),
            note: Some("bookmark note".to_string()),
            review_contents: reviews.iter().map(|r| r.to_string()).collect(),
            color_index: Some(2),
            timestamp: Some(1_600_000_000.0),
            chapter_title: Some("Chapter 3".to_string()),
        }
    }

    #[test]
    fn test_reviews_replace_note() {
        let highlight = UnifiedHighlight::from(bookmark(&["first", "second"]));
        assert_eq!(highlight.note.as_deref(), Some("first\nsecond"));
        assert_eq!(highlight.location.as_deref(), Some("Chapter 3"));
        assert_eq!(highlight.date_added.map(|d| d.timestamp()), Some(1_600_000_000));

        let highlight = UnifiedHighlight::from(bookmark(&[]));
        assert_eq!(highlight.note.as_deref(), Some("bookmark note"));
    }

    #[test]
    fn test_item_properties() {
        let book = WeReadBook {
            book_id: "9001".to_string(),
            title: "三体".to_string(),
            author: String::new(),
            category: None,
            highlight_count: 0,
        };
        let reader = Arc::new(crate::sources::testing::VecReader::<WeReadBookmarkRow>::new(Vec::new()));
        let adapter = WeReadAdapter::new(book, reader);

        let props = adapter.additional_item_properties();
        assert!(!props.contains_key("Author"));
        assert_eq!(props["WeRead Book ID"], rich_text("9001"));
        assert_eq!(adapter.sync_item().label(), "\"三体\"");
    }
}
