use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HighlightSource {
    AppleBooks,
    GoodLinks,
    WeRead,
    Dedao,
    Chats,
}

impl HighlightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            HighlightSource::AppleBooks => "appleBooks",
            HighlightSource::GoodLinks => "goodLinks",
            HighlightSource::WeRead => "weRead",
            HighlightSource::Dedao => "dedao",
            HighlightSource::Chats => "chats",
        }
    }

    pub fn from_key(s: &str) -> Option<Self> {
        match s {
            "appleBooks" => Some(HighlightSource::AppleBooks),
            "goodLinks" => Some(HighlightSource::GoodLinks),
            "weRead" => Some(HighlightSource::WeRead),
            "dedao" => Some(HighlightSource::Dedao),
            "chats" => Some(HighlightSource::Chats),
            _ => None,
        }
    }

    fn palette(&self) -> &'static [&'static str] {
        match self {
            HighlightSource::AppleBooks => &["orange", "green", "blue", "yellow", "pink", "purple"],
            HighlightSource::GoodLinks => &["yellow", "green", "blue", "red", "purple", "brown"],
            HighlightSource::WeRead => &["red", "purple", "blue", "green", "yellow"],
            HighlightSource::Dedao => &["orange"],
            // 0 = sent by me, 1 = sent by the other side, 2 = system message
            HighlightSource::Chats => &["blue", "green", "gray"],
        }
    }

    fn fallback_color(&self) -> &'static str {
        match self {
            // the remote store has no mint, brown stands in for it
            HighlightSource::GoodLinks => "brown",
            HighlightSource::Dedao => "orange",
            HighlightSource::AppleBooks | HighlightSource::WeRead | HighlightSource::Chats => "gray",
        }
    }

    /// Remote colour name for a source-native colour index.
    pub fn color_name(&self, index: i32) -> &'static str {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.palette().get(i).copied())
            .unwrap_or_else(|| self.fallback_color())
    }
}

/// A top-level syncable unit: a book, an article or a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncItem {
    pub item_id: String,
    pub title: String,
    pub author: String,
    pub url: Option<String>,
    pub source: HighlightSource,
    pub highlight_count: usize,
}

impl SyncItem {
    pub fn label(&self) -> String {
        if self.author.is_empty() {
            format!("\"{}\"", self.title)
        } else {
            format!("\"{}\" ({})", self.title, self.author)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedHighlight {
    /// Stable across fetches of the same logical highlight; the diffing key.
    pub uuid: String,
    pub text: String,
    pub note: Option<String>,
    pub color_index: Option<i32>,
    pub date_added: Option<DateTime<Utc>>,
    pub date_modified: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub source: HighlightSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedRecord {
    pub uuid: String,
    pub remote_object_id: String,
    pub content_hash: String,
}

impl SyncedRecord {
    pub fn new(uuid: impl Into<String>, remote_object_id: impl Into<String>, content_hash: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            remote_object_id: remote_object_id.into(),
            content_hash: content_hash.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStrategy {
    /// One remote container per source; one page per item; one block per highlight.
    SingleDatabase,
    /// One remote container per item; one record per highlight.
    PerItemDatabase,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::SingleDatabase => "single",
            SyncStrategy::PerItemDatabase => "perItem",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_name_fallbacks() {
        assert_eq!(HighlightSource::AppleBooks.color_name(3), "yellow");
        assert_eq!(HighlightSource::AppleBooks.color_name(9), "gray");
        assert_eq!(HighlightSource::GoodLinks.color_name(7), "brown");
        assert_eq!(HighlightSource::Dedao.color_name(-1), "orange");
        assert_eq!(HighlightSource::Chats.color_name(2), "gray");
    }

    #[test]
    fn test_source_key_roundtrip() {
        for source in [
            HighlightSource::AppleBooks,
            HighlightSource::GoodLinks,
            HighlightSource::WeRead,
            HighlightSource::Dedao,
            HighlightSource::Chats,
        ] {
            assert_eq!(HighlightSource::from_key(source.as_str()), Some(source));
        }
        assert_eq!(HighlightSource::from_key("kindle"), None);
    }
}
