//! The contract every data source implements to be driven by the sync engine.

use async_trait::async_trait;

use crate::blocks::{self, RecordPayload};
use crate::model::{HighlightSource, SyncItem, SyncStrategy, UnifiedHighlight};
use crate::remote::PropertyMap;

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used for bindings, ledger keys and colour mapping.
    fn source_key(&self) -> &str;

    /// Title of the shared remote container, e.g. `SyncNos-AppleBooks`.
    fn container_title(&self) -> &str;

    fn highlight_source(&self) -> HighlightSource;

    fn sync_item(&self) -> SyncItem;

    /// Called at most once per sync pass. Errors abort the item's sync.
    async fn fetch_highlights(&self) -> anyhow::Result<Vec<UnifiedHighlight>>;

    fn additional_schema_fields(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn additional_item_properties(&self) -> PropertyMap {
        PropertyMap::new()
    }

    fn supported_strategies(&self) -> &[SyncStrategy] {
        &[SyncStrategy::SingleDatabase]
    }

    fn current_strategy(&self) -> SyncStrategy {
        SyncStrategy::SingleDatabase
    }

    /// Heading placed on a freshly created item page.
    fn page_header(&self) -> Option<&str> {
        Some("Highlights")
    }

    /// Whether the source's modification timestamp can stand in for the
    /// content fingerprint.
    fn prefers_modification_token(&self) -> bool {
        false
    }

    fn as_per_item(&self) -> Option<&dyn PerItemSourceAdapter> {
        None
    }
}

/// Extra capabilities for sources that can give every item its own container.
pub trait PerItemSourceAdapter: SourceAdapter {
    fn per_item_schema(&self) -> PropertyMap {
        blocks::per_item_schema()
    }

    fn per_item_container_title(&self) -> String {
        format!("{} - {}", self.container_title(), self.sync_item().title)
    }

    fn build_record(&self, highlight: &UnifiedHighlight) -> RecordPayload {
        let item = self.sync_item();
        RecordPayload {
            properties: blocks::highlight_properties(&item, highlight, self.source_key()),
            children: blocks::highlight_children(highlight),
        }
    }
}
