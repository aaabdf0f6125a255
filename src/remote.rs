//! The engine's view of the remote document store.
//!
//! Implementations own transport, authentication and retry-with-backoff; the
//! engine only tells "container/page is gone" apart from every other failure.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::blocks::{HighlightBlock, RecordPayload};
use crate::model::SyncItem;

pub type PropertyMap = serde_json::Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteTarget {
    Container,
    Page,
    Block,
    Record,
}

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote rejected credentials: {0}")]
    Unauthorized(String),
    #[error("remote {target:?} not found: {id}")]
    NotFound { target: RemoteTarget, id: String },
    #[error("remote rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("remote transport failure: {0}")]
    Transport(String),
}

impl RemoteError {
    pub fn not_found(target: RemoteTarget, id: impl Into<String>) -> Self {
        RemoteError::NotFound { target, id: id.into() }
    }

    pub fn is_container_missing(&self) -> bool {
        matches!(self, RemoteError::NotFound { target: RemoteTarget::Container, .. })
    }

    pub fn is_missing(&self, what: RemoteTarget) -> bool {
        matches!(self, RemoteError::NotFound { target, .. } if *target == what)
    }
}

/// Block id and stored change token found on an existing remote page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HighlightMarker {
    pub block_id: String,
    pub token: Option<String>,
}

#[async_trait]
pub trait RemoteMutationClient: Send + Sync {
    async fn container_exists(&self, container_id: &str) -> Result<bool, RemoteError>;

    async fn find_container_by_title(&self, title: &str, parent_id: &str) -> Result<Option<String>, RemoteError>;

    async fn create_container(&self, title: &str, parent_id: &str, schema: &PropertyMap) -> Result<String, RemoteError>;

    async fn ensure_schema_fields(&self, container_id: &str, fields: &PropertyMap) -> Result<(), RemoteError>;

    async fn find_page_by_item_id(&self, container_id: &str, item_id: &str) -> Result<Option<String>, RemoteError>;

    async fn create_page(&self, container_id: &str, item: &SyncItem, header: Option<&str>) -> Result<String, RemoteError>;

    async fn update_page_properties(&self, page_id: &str, properties: &PropertyMap) -> Result<(), RemoteError>;

    /// Appends at most one batch of blocks and returns their ids in order.
    async fn append_blocks_and_get_ids(&self, page_id: &str, blocks: &[HighlightBlock]) -> Result<Vec<String>, RemoteError>;

    async fn update_block_content(&self, block_id: &str, block: &HighlightBlock) -> Result<(), RemoteError>;

    async fn list_existing_highlight_markers(&self, page_id: &str) -> Result<HashMap<String, HighlightMarker>, RemoteError>;

    async fn find_record_by_uuid(&self, container_id: &str, uuid: &str) -> Result<Option<String>, RemoteError>;

    async fn create_record(&self, container_id: &str, record: &RecordPayload) -> Result<String, RemoteError>;

    async fn update_record(&self, record_id: &str, record: &RecordPayload) -> Result<(), RemoteError>;
}
