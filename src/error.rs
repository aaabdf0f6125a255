use crate::model::SyncStrategy;
use crate::remote::RemoteError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Missing credentials or target. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("source {source_key} does not support the {} strategy", strategy.as_str())]
    UnsupportedStrategy { source_key: String, strategy: SyncStrategy },
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("failed to read highlights from {source_key}: {error:#}")]
    Source {
        source_key: String,
        #[source]
        error: anyhow::Error,
    },
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, SyncError::Configuration(_))
    }
}
