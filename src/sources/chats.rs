use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use super::{RowReader, read_all_pages, rich_text};
use crate::adapter::SourceAdapter;
use crate::model::{HighlightSource, SyncItem, UnifiedHighlight};
use crate::remote::PropertyMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatContact {
    pub id: String,
    pub name: String,
    pub message_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMessageKind {
    Text,
    Image,
    Voice,
    Card,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessageRow {
    pub id: String,
    pub content: String,
    pub is_from_me: bool,
    pub sender_name: Option<String>,
    pub kind: ChatMessageKind,
}

impl ChatMessageRow {
    /// Rendered as the highlight style: 0 mine, 1 theirs, 2 system.
    fn direction(&self) -> i32 {
        match (self.kind, self.is_from_me) {
            (ChatMessageKind::System, _) => 2,
            (_, true) => 0,
            (_, false) => 1,
        }
    }

    /// Sender becomes the highlight text and the message its note, so the
    /// page shows the sender with the message nested under it.
    fn into_highlight(self, contact_name: &str) -> UnifiedHighlight {
        let direction = self.direction();
        let sender = match self.sender_name.filter(|s| !s.is_empty()) {
            Some(name) => name,
            None if self.is_from_me => "Me".to_string(),
            None => contact_name.to_string(),
        };
        UnifiedHighlight {
            uuid: self.id,
            text: sender,
            note: Some(self.content),
            color_index: Some(direction),
            date_added: None,
            date_modified: None,
            location: None,
            source: HighlightSource::Chats,
        }
    }
}

pub struct ChatsAdapter {
    contact: ChatContact,
    reader: Arc<dyn RowReader<ChatMessageRow>>,
    page_size: usize,
}

impl ChatsAdapter {
    pub fn new(contact: ChatContact, reader: Arc<dyn RowReader<ChatMessageRow>>) -> Self {
        Self {
            contact,
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
impl SourceAdapter for ChatsAdapter {
    fn source_key(&self) -> &str {
        HighlightSource::Chats.as_str()
    }

    fn container_title(&self) -> &str {
        "SyncNos-Chats"
    }

    fn highlight_source(&self) -> HighlightSource {
        HighlightSource::Chats
    }

    fn sync_item(&self) -> SyncItem {
        SyncItem {
            item_id: self.contact.id.clone(),
            title: self.contact.name.clone(),
            author: String::new(),
            url: None,
            source: HighlightSource::Chats,
            highlight_count: self.contact.message_count,
        }
    }

    async fn fetch_highlights(&self) -> Result<Vec<UnifiedHighlight>> {
        let rows = read_all_pages(self.reader.as_ref(), &self.contact.id, self.page_size).await?;
        Ok(rows
            .into_iter()
            .map(|row| row.into_highlight(&self.contact.name))
            .collect())
    }

    fn additional_schema_fields(&self) -> PropertyMap {
        let mut fields = PropertyMap::new();
        fields.insert("Contact".into(), json!({ "rich_text": {} }));
        fields.insert("Message Count".into(), json!({ "number": { "format": "number" } }));
        fields
    }

    fn additional_item_properties(&self) -> PropertyMap {
        let mut properties = PropertyMap::new();
        properties.insert("Contact".into(), rich_text(&self.contact.name));
        properties.insert("Message Count".into(), json!({ "number": self.contact.message_count }));
        properties
    }

    fn page_header(&self) -> Option<&str> {
        Some("Messages")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::testing::VecReader;

    fn message(id: &str, from_me: bool, sender: Option<&str>, kind: ChatMessageKind) -> ChatMessageRow {
        ChatMessageRow {
            id: id.to_string(),
            content: format!("message {id}"),
            is_from_me: from_me,
            sender_name: sender.map(str::to_string),
            kind,
        }
    }

    #[tokio::test]
    async fn test_messages_become_sender_highlights() {
        let rows = vec![
            message("1", true, None, ChatMessageKind::Text),
            message("2", false, None, ChatMessageKind::Text),
            message("3", false, Some("Bob"), ChatMessageKind::Image),
            message("4", false, Some(""), ChatMessageKind::System),
        ];
        let contact = ChatContact {
            id: "conv-1".to_string(),
            name: "Alice".to_string(),
            message_count: 4,
        };
        let adapter = ChatsAdapter::new(contact, Arc::new(VecReader::new(rows)));

        let highlights = adapter.fetch_highlights().await.unwrap();
        let senders: Vec<_> = highlights.iter().map(|h| h.text.as_str()).collect();
        assert_eq!(senders, vec!["Me", "Alice", "Bob", "Alice"]);
        let colors: Vec<_> = highlights.iter().map(|h| h.color_index).collect();
        assert_eq!(colors, vec![Some(0), Some(1), Some(1), Some(2)]);
        assert_eq!(highlights[0].note.as_deref(), Some("message 1"));
        assert_eq!(HighlightSource::Chats.color_name(2), "gray");
    }

    #[test]
    fn test_contact_properties() {
        let contact = ChatContact {
            id: "conv-1".to_string(),
            name: "Alice".to_string(),
            message_count: 12,
        };
        let adapter = ChatsAdapter::new(contact, Arc::new(VecReader::<ChatMessageRow>::new(Vec::new())));
        let props = adapter.additional_item_properties();
        assert_eq!(props["Message Count"], json!({ "number": 12 }));
        assert_eq!(adapter.sync_item().label(), "\"Alice\"");
    }
}
