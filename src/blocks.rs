use serde::Serialize;
use serde_json::{Value, json};

use crate::fingerprint::format_date;
use crate::model::{HighlightSource, SyncItem, UnifiedHighlight};
use crate::remote::PropertyMap;

pub const MAX_TEXT_LENGTH: usize = 1500;

const UUID_PREFIX: &str = "[uuid:";
const TOKEN_PREFIX: &str = "modified:";

/// One highlight rendered as a remote block on an item page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HighlightBlock {
    pub uuid: String,
    pub item_id: String,
    pub text: String,
    pub note: Option<String>,
    pub color: String,
    pub added: Option<String>,
    pub location: Option<String>,
    /// Change token the block was written with; listing reads it back.
    pub token: String,
}

impl HighlightBlock {
    pub fn build(highlight: &UnifiedHighlight, item_id: &str, source_key: &str, token: String) -> Self {
        let source = HighlightSource::from_key(source_key).unwrap_or(highlight.source);
        Self {
            uuid: highlight.uuid.clone(),
            item_id: item_id.to_string(),
            text: truncate(&highlight.text, MAX_TEXT_LENGTH),
            note: highlight
                .note
                .as_deref()
                .filter(|n| !n.trim().is_empty())
                .map(|n| truncate(n, MAX_TEXT_LENGTH)),
            color: highlight.color_index.map(|i| source.color_name(i)).unwrap_or("").to_string(),
            added: highlight.date_added.as_ref().map(format_date),
            location: highlight.location.clone(),
            token,
        }
    }

    /// The two marker lines written ahead of the highlight text.
    pub fn header_lines(&self) -> [String; 2] {
        let mut parts = Vec::new();
        if !self.color.is_empty() {
            parts.push(format!("style:{}", self.color));
        }
        if let Some(added) = &self.added {
            parts.push(format!("added:{added}"));
        }
        parts.push(format!("{TOKEN_PREFIX}{}", self.token));
        [format!("{UUID_PREFIX}{}]", self.uuid), parts.join(" | ")]
    }

    pub fn rendered_text(&self) -> String {
        let [uuid_line, meta_line] = self.header_lines();
        format!("{uuid_line}\n{meta_line}\n{}", self.text)
    }
}

/// Recovers `(uuid, token)` from text produced by [`HighlightBlock::rendered_text`].
pub fn parse_marker(text: &str) -> Option<(String, Option<String>)> {
    let start = text.find(UUID_PREFIX)? + UUID_PREFIX.len();
    let end = start + text[start..].find(']')?;
    let uuid = text[start..end].trim();
    if uuid.is_empty() {
        return None;
    }

    let token = text[end..]
        .lines()
        .flat_map(|line| line.split('|'))
        .map(str::trim)
        .find_map(|part| part.strip_prefix(TOKEN_PREFIX))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Some((uuid.to_string(), token))
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

/// A full remote record for one highlight (per-item strategy).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecordPayload {
    pub properties: PropertyMap,
    pub children: Vec<Value>,
}

fn rich_text(content: &str) -> Value {
    json!({ "rich_text": [{ "text": { "content": content } }] })
}

fn date(start: &str) -> Value {
    json!({ "date": { "start": start } })
}

pub fn per_item_schema() -> PropertyMap {
    let mut schema = PropertyMap::new();
    schema.insert("Text".into(), json!({ "title": {} }));
    for name in ["UUID", "Note", "Style", "Location", "Item ID", "Item Title", "Author"] {
        schema.insert(name.into(), json!({ "rich_text": {} }));
    }
    schema.insert("Added At".into(), json!({ "date": {} }));
    schema.insert("Modified At".into(), json!({ "date": {} }));
    schema.insert("Link".into(), json!({ "url": {} }));
    schema
}

pub fn highlight_properties(item: &SyncItem, highlight: &UnifiedHighlight, source_key: &str) -> PropertyMap {
    let block = HighlightBlock::build(highlight, &item.item_id, source_key, String::new());
    let mut properties = PropertyMap::new();
    properties.insert(
        "Text".into(),
        json!({ "title": [{ "text": { "content": block.text } }] }),
    );
    properties.insert("UUID".into(), rich_text(&highlight.uuid));
    properties.insert("Item ID".into(), rich_text(&item.item_id));
    properties.insert("Item Title".into(), rich_text(&item.title));
    properties.insert("Author".into(), rich_text(&item.author));

    // empty values are cleared explicitly so an update removes stale content
    properties.insert(
        "Note".into(),
        match &block.note {
            Some(note) => rich_text(note),
            None => json!({ "rich_text": [] }),
        },
    );
    if !block.color.is_empty() {
        properties.insert("Style".into(), rich_text(&block.color));
    }
    if let Some(added) = &block.added {
        properties.insert("Added At".into(), date(added));
    }
    if let Some(modified) = highlight.date_modified.as_ref() {
        properties.insert("Modified At".into(), date(&format_date(modified)));
    }
    if let Some(location) = &block.location {
        properties.insert("Location".into(), rich_text(location));
    }
    if let Some(url) = &item.url {
        properties.insert("Link".into(), json!({ "url": url }));
    }
    properties
}

pub fn highlight_children(highlight: &UnifiedHighlight) -> Vec<Value> {
    let mut children = vec![json!({
        "object": "block",
        "quote": { "rich_text": [{ "text": { "content": truncate(&highlight.text, MAX_TEXT_LENGTH) } }] }
    })];
    if let Some(note) = highlight.note.as_deref().filter(|n| !n.trim().is_empty()) {
        children.push(json!({
            "object": "block",
            "paragraph": { "rich_text": [{ "text": { "content": truncate(note, MAX_TEXT_LENGTH) } }] }
        }));
    }
    children
}
