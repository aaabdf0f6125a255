//! Source adapters. Each reads native rows through a [`RowReader`] owned by
//! the host and converts them into [`UnifiedHighlight`](crate::model::UnifiedHighlight)s.

pub mod apple_books;
pub mod chats;
pub mod dedao;
pub mod goodlinks;
pub mod weread;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};

pub use apple_books::{AppleBooksAdapter, AppleBooksBook, AppleBooksHighlightRow};
pub use chats::{ChatContact, ChatMessageKind, ChatMessageRow, ChatsAdapter};
pub use dedao::{DedaoAdapter, DedaoBook, DedaoNoteRow};
pub use goodlinks::{GoodLinksAdapter, GoodLinksHighlightRow, GoodLinksLink, parse_tags};
pub use weread::{WeReadAdapter, WeReadBook, WeReadBookmarkRow};

/// Paged access to the rows a local database, cache or API holds for one item.
#[async_trait]
pub trait RowReader<R>: Send + Sync {
    async fn read_page(&self, item_id: &str, limit: usize, offset: usize) -> Result<Vec<R>>;
}

/// Reads every page for `item_id`, stopping at the first short page.
pub async fn read_all_pages<R: Send>(reader: &dyn RowReader<R>, item_id: &str, page_size: usize) -> Result<Vec<R>> {
    let page_size = page_size.max(1);
    let mut rows = Vec::new();
    let mut offset = 0;
    loop {
        let page = reader.read_page(item_id, page_size, offset).await?;
        let fetched = page.len();
        rows.extend(page);
        if fetched < page_size {
            break;
        }
        offset += page_size;
    }
    Ok(rows)
}

/// Unix seconds to a timestamp; zero and negative values mean "unknown".
pub(crate) fn from_unix_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    DateTime::from_timestamp_millis((secs * 1000.0).round() as i64)
}

pub(crate) fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Serves a fixed row set in pages and records every request.
    pub struct VecReader<R> {
        rows: Vec<R>,
        pub requests: Mutex<Vec<(usize, usize)>>,
    }

    impl<R> VecReader<R> {
        pub fn new(rows: Vec<R>) -> Self {
            Self {
                rows,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl<R: Clone + Send + Sync> RowReader<R> for VecReader<R> {
        async fn read_page(&self, _item_id: &str, limit: usize, offset: usize) -> Result<Vec<R>> {
            self.requests.lock().unwrap().push((limit, offset));
            Ok(self.rows.iter().skip(offset).take(limit).cloned().collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::VecReader;
    use super::*;

    #[tokio::test]
    async fn test_read_all_pages_stops_on_short_page() {
        let reader = VecReader::new((0..25).collect::<Vec<u32>>());
        let rows = read_all_pages(&reader, "item", 10).await.unwrap();
        assert_eq!(rows.len(), 25);
        assert_eq!(*reader.requests.lock().unwrap(), vec![(10, 0), (10, 10), (10, 20)]);
    }

    #[tokio::test]
    async fn test_read_all_pages_exact_multiple() {
        let reader = VecReader::new((0..20).collect::<Vec<u32>>());
        let rows = read_all_pages(&reader, "item", 10).await.unwrap();
        assert_eq!(rows, (0..20).collect::<Vec<u32>>());
        assert_eq!(reader.requests.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_from_unix_seconds() {
        assert_eq!(from_unix_seconds(0.0), None);
        assert_eq!(from_unix_seconds(-5.0), None);
        assert_eq!(
            from_unix_seconds(1_700_000_000.5).map(|d| d.timestamp_millis()),
            Some(1_700_000_000_500)
        );
    }
}
