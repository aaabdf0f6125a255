use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;

use super::{RowReader, from_unix_seconds, read_all_pages, rich_text};
use crate::adapter::SourceAdapter;
use crate::fingerprint::format_date;
use crate::model::{HighlightSource, SyncItem, UnifiedHighlight};
use crate::remote::PropertyMap;

/// Separator the GoodLinks database writes between tags.
const TAG_SEPARATOR: char = '\u{2063}';
const MANUAL_SEPARATORS: &[char] = &[',', '，', ';', '；', '|', '、', ' '];

/// Splits a raw tag string into unique tag names, keeping first-seen order.
pub fn parse_tags(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let primary: Vec<&str> = raw
        .split(TAG_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let chunks = if primary.is_empty() { vec![raw] } else { primary };

    let mut seen = HashSet::new();
    chunks
        .into_iter()
        .flat_map(|chunk| chunk.split(MANUAL_SEPARATORS))
        .map(str::trim)
        .map(|tag| tag.strip_prefix('#').unwrap_or(tag))
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_string()))
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodLinksLink {
    pub id: String,
    pub url: String,
    pub title: Option<String>,
    pub author: Option<String>,
    pub tags: Option<String>,
    pub summary: Option<String>,
    #[serde(default)]
    pub starred: bool,
    /// Unix seconds.
    pub added_at: f64,
    pub modified_at: f64,
    pub highlight_total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoodLinksHighlightRow {
    pub id: String,
    pub content: String,
    pub note: Option<String>,
    pub color: Option<i32>,
    /// Unix seconds.
    pub time: f64,
}

impl From<GoodLinksHighlightRow> for UnifiedHighlight {
    fn from(row: GoodLinksHighlightRow) -> Self {
        UnifiedHighlight {
            uuid: row.id,
            text: row.content,
            note: row.note,
            color_index: row.color,
            date_added: from_unix_seconds(row.time),
            date_modified: None,
            location: None,
            source: HighlightSource::GoodLinks,
        }
    }
}

pub struct GoodLinksAdapter {
    link: GoodLinksLink,
    reader: Arc<dyn RowReader<GoodLinksHighlightRow>>,
    page_size: usize,
}

impl GoodLinksAdapter {
    pub fn new(link: GoodLinksLink, reader: Arc<dyn RowReader<GoodLinksHighlightRow>>) -> Self {
        Self {
            link,
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
impl SourceAdapter for GoodLinksAdapter {
    fn source_key(&self) -> &str {
        HighlightSource::GoodLinks.as_str()
    }

    fn container_title(&self) -> &str {
        "SyncNos-GoodLinks"
    }

    fn highlight_source(&self) -> HighlightSource {
        HighlightSource::GoodLinks
    }

    fn sync_item(&self) -> SyncItem {
        SyncItem {
            item_id: self.link.id.clone(),
            title: self.link.title.clone().unwrap_or_else(|| self.link.url.clone()),
            author: self.link.author.clone().unwrap_or_default(),
            url: Some(self.link.url.clone()),
            source: HighlightSource::GoodLinks,
            highlight_count: self.link.highlight_total.unwrap_or(0),
        }
    }

    async fn fetch_highlights(&self) -> Result<Vec<UnifiedHighlight>> {
        let rows = read_all_pages(self.reader.as_ref(), &self.link.id, self.page_size).await?;
        Ok(rows.into_iter().map(UnifiedHighlight::from).collect())
    }

    fn additional_schema_fields(&self) -> PropertyMap {
        let mut fields = PropertyMap::new();
        fields.insert("Tags".into(), json!({ "multi_select": {} }));
        fields.insert("Summary".into(), json!({ "rich_text": {} }));
        fields.insert("Starred".into(), json!({ "checkbox": {} }));
        fields.insert("Added At".into(), json!({ "date": {} }));
        fields.insert("Modified At".into(), json!({ "date": {} }));
        fields
    }

    fn additional_item_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();

        let tags = self.link.tags.as_deref().map(parse_tags).unwrap_or_default();
        if !tags.is_empty() {
            let names: Vec<_> = tags.iter().map(|name| json!({ "name": name })).collect();
            properties.insert("Tags".into(), json!({ "multi_select": names }));
        }
        if let Some(summary) = self.link.summary.as_deref().filter(|s| !s.is_empty()) {
            properties.insert("Summary".into(), rich_text(summary));
        }
        properties.insert("Starred".into(), json!({ "checkbox": self.link.starred }));
        if let Some(added) = from_unix_seconds(self.link.added_at) {
            properties.insert("Added At".into(), json!({ "date": { "start": format_date(&added) } }));
        }
        if let Some(modified) = from_unix_seconds(self.link.modified_at) {
            properties.insert("Modified At".into(), json!({ "date": { "start": format_date(&modified) } }));
        }
        properties
    }

    fn page_header(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::VecReader;

    fn link() -> GoodLinksLink {
        GoodLinksLink {
            id: "link-1".to_string(),
            url: "https://example.com/post".to_string(),
            title: None,
            author: None,
            tags: Some("#rust\u{2063}async, tokio；rust".to_string()),
            summary: Some(String::new()),
            starred: true,
            added_at: 1_700_000_000.0,
            modified_at: 0.0,
            highlight_total: Some(1),
        }
    }

    #[test]
    fn test_parse_tags() {
        assert_eq!(parse_tags("a\u{2063}b\u{2063}c"), vec!["a", "b", "c"]);
        assert_eq!(parse_tags("#one, two；three|one"), vec!["one", "two", "three"]);
        assert_eq!(parse_tags("读书、笔记 #读书"), vec!["读书", "笔记"]);
        assert!(parse_tags("").is_empty());
        assert!(parse_tags("  ,  ").is_empty());
    }

    #[test]
    fn test_item_falls_back_to_url() {
        let adapter = GoodLinksAdapter::new(link(), Arc::new(VecReader::<GoodLinksHighlightRow>::new(Vec::new())));
        let item = adapter.sync_item();
        assert_eq!(item.title, "https://example.com/post");
        assert_eq!(item.author, "");
        assert_eq!(adapter.page_header(), None);
    }

    #[test]
    fn test_additional_item_properties() {
        let adapter = GoodLinksAdapter::new(link(), Arc::new(VecReader::<GoodLinksHighlightRow>::new(Vec::new())));
        let props = adapter.additional_item_properties();

        assert_eq!(
            props["Tags"],
            json!({ "multi_select": [{ "name": "rust" }, { "name": "async" }, { "name": "tokio" }] })
        );
        assert!(!props.contains_key("Summary"));
        assert!(!props.contains_key("Modified At"));
        assert_eq!(props["Starred"], json!({ "checkbox": true }));
        assert_eq!(props["Added At"], json!({ "date": { "start": "2023-11-14T22:13:20Z" } }));
    }

    #[tokio::test]
    async fn test_fetch_converts_rows() {
        let rows = vec![GoodLinksHighlightRow {
            id: "g1".to_string(),
            content: "quoted".to_string(),
            note: Some("mine".to_string()),
            color: Some(5),
            time: 0.0,
        }];
        let adapter = GoodLinksAdapter::new(link(), Arc::new(VecReader::new(rows)));
        let highlights = adapter.fetch_highlights().await.unwrap();
        assert_eq!(highlights[0].date_added, None);
        assert_eq!(highlights[0].color_index, Some(5));
        assert_eq!(highlights[0].source, HighlightSource::GoodLinks);
    }
}
