//! Sync orchestration: decides per item what the remote store is missing and
//! issues only those mutations.
//!
//! Each item sync walks the phases of [`SyncPhase`] strictly in order. Items
//! run concurrently with each other, bounded by the shared
//! [`ConcurrencyLimiter`]; container creation is serialized per key by the
//! [`ResourceCreationCoordinator`].

mod per_item;
mod single;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::adapter::SourceAdapter;
use crate::config::{Remote, SyncSettings};
use crate::coordinator::ResourceCreationCoordinator;
use crate::db::Database;
use crate::error::SyncError;
use crate::ledger::SyncedRecordLedger;
use crate::limiter::ConcurrencyLimiter;
use crate::model::{SyncItem, SyncStrategy, SyncedRecord, UnifiedHighlight};
use crate::remote::{PropertyMap, RemoteMutationClient};
use crate::state::{BindingScope, DatabaseBindings, SyncTimestamps};
use crate::sync::{SyncStats, log_ledger_error};

/// Receives human-readable progress messages.
pub type Progress<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Progress sink that drops every message.
pub fn no_progress(_: &str) {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    EnsuringContainer,
    EnsuringItemPage,
    Fetching,
    Diffing,
    Mutating,
    Finalizing,
    Done,
    Failed,
}

pub(crate) struct PhaseTracker {
    label: String,
    phase: SyncPhase,
}

impl PhaseTracker {
    fn new(source_key: &str, item: &SyncItem) -> Self {
        Self {
            label: format!("{}:{}", source_key, item.item_id),
            phase: SyncPhase::Idle,
        }
    }

    pub(crate) fn enter(&mut self, next: SyncPhase) {
        tracing::debug!("[SyncEngine] {} {:?} -> {:?}", self.label, self.phase, next);
        self.phase = next;
    }

    fn fail(&mut self, error: &SyncError) {
        tracing::debug!("[SyncEngine] {} failed during {:?}: {}", self.label, self.phase, error);
        self.phase = SyncPhase::Failed;
    }
}

pub struct SyncEngine {
    remote: Arc<dyn RemoteMutationClient>,
    ledger: SyncedRecordLedger,
    bindings: DatabaseBindings,
    timestamps: SyncTimestamps,
    coordinator: Arc<ResourceCreationCoordinator>,
    limiter: ConcurrencyLimiter,
    remote_config: Remote,
    settings: SyncSettings,
}

impl SyncEngine {
    pub fn new(
        remote: Arc<dyn RemoteMutationClient>,
        db: Arc<Database>,
        remote_config: Remote,
        settings: SyncSettings,
    ) -> Self {
        Self {
            remote,
            ledger: SyncedRecordLedger::new(db.clone()),
            bindings: DatabaseBindings::new(db.clone()),
            timestamps: SyncTimestamps::new(db),
            coordinator: Arc::new(ResourceCreationCoordinator::new()),
            limiter: ConcurrencyLimiter::new(settings.batch_concurrency),
            remote_config,
            settings,
        }
    }

    /// Shares a coordinator with other engines talking to the same store.
    pub fn with_coordinator(mut self, coordinator: Arc<ResourceCreationCoordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn ledger(&self) -> &SyncedRecordLedger {
        &self.ledger
    }

    pub fn timestamps(&self) -> &SyncTimestamps {
        &self.timestamps
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Syncs incrementally when the item was synced before, fully otherwise.
    pub async fn sync_smart(&self, adapter: &dyn SourceAdapter, progress: Progress<'_>) -> Result<SyncStats, SyncError> {
        let item = adapter.sync_item();
        let source_key = adapter.source_key();
        tracing::info!("[SmartSync] starting sync for {}: {}", source_key, item.label());

        let last_sync = self.last_sync(source_key, &item.item_id).await;
        let incremental = last_sync.is_some();

        match self.sync(adapter, incremental, progress).await {
            Ok(stats) => {
                tracing::info!(
                    appended = stats.appended,
                    updated = stats.updated,
                    unchanged = stats.unchanged,
                    "[SmartSync] completed sync for {}: {}",
                    source_key,
                    item.label()
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::error!(error = %e, "[SmartSync] failed sync for {}: {}", source_key, item.label());
                Err(e)
            }
        }
    }

    pub async fn sync(
        &self,
        adapter: &dyn SourceAdapter,
        incremental: bool,
        progress: Progress<'_>,
    ) -> Result<SyncStats, SyncError> {
        let item = adapter.sync_item();
        let mut phase = PhaseTracker::new(adapter.source_key(), &item);
        let strategy = adapter.current_strategy();

        let unsupported = || SyncError::UnsupportedStrategy {
            source_key: adapter.source_key().to_string(),
            strategy,
        };

        let result = if !adapter.supported_strategies().contains(&strategy) {
            Err(unsupported())
        } else {
            match strategy {
                SyncStrategy::SingleDatabase => {
                    self.sync_single_database(adapter, &item, incremental, progress, &mut phase)
                        .await
                }
                SyncStrategy::PerItemDatabase => match adapter.as_per_item() {
                    Some(per_item) => self.sync_per_item_database(per_item, &item, progress, &mut phase).await,
                    None => Err(unsupported()),
                },
            }
        };

        match &result {
            Ok(_) => phase.enter(SyncPhase::Done),
            Err(e) => phase.fail(e),
        }
        result
    }

    /// Syncs every adapter concurrently under the shared limiter. A failing
    /// item does not stop the others; cancelling `cancel` abandons items that
    /// have not finished yet.
    pub async fn sync_batch(
        &self,
        adapters: &[Box<dyn SourceAdapter>],
        progress: Progress<'_>,
        cancel: &CancellationToken,
    ) -> Vec<(String, Result<SyncStats, SyncError>)> {
        tracing::info!(
            "[SyncEngine] syncing {} items, at most {} at a time",
            adapters.len(),
            self.limiter.limit()
        );
        let tasks = adapters.iter().map(|adapter| async move {
            let item_id = adapter.sync_item().item_id;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                result = self.limiter.with_permit(self.sync_smart(adapter.as_ref(), progress)) => result,
            };
            (item_id, result)
        });
        let results = join_all(tasks).await;

        let failed = results.iter().filter(|(_, r)| r.is_err()).count();
        let mutations: usize = results
            .iter()
            .filter_map(|(_, r)| r.as_ref().ok())
            .map(SyncStats::mutations)
            .sum();
        tracing::info!(
            "[SyncEngine] batch finished: {} items, {} failed, {} highlights written",
            results.len(),
            failed,
            mutations
        );
        if results.iter().any(|(_, r)| matches!(r, Err(e) if e.is_configuration())) {
            tracing::error!("[SyncEngine] remote is not configured, set the token and parent page id");
        }
        results
    }

    fn require_remote_config(&self) -> Result<&str, SyncError> {
        let parent_id = self
            .remote_config
            .parent_page_id()
            .ok_or_else(|| SyncError::Configuration("remote parent page id is not set".to_string()))?;
        if self.remote_config.token().is_none() {
            return Err(SyncError::Configuration(
                "remote token is not set, authorize the remote store first".to_string(),
            ));
        }
        Ok(parent_id)
    }

    async fn fetch_highlights<A: SourceAdapter + ?Sized>(
        &self,
        adapter: &A,
        progress: Progress<'_>,
    ) -> Result<Vec<UnifiedHighlight>, SyncError> {
        progress("Fetching highlights...");
        let mut highlights = adapter.fetch_highlights().await.map_err(|error| SyncError::Source {
            source_key: adapter.source_key().to_string(),
            error,
        })?;
        // colour palettes fall back to the highlight's source for unknown keys
        let source = adapter.highlight_source();
        for highlight in &mut highlights {
            highlight.source = source;
        }
        tracing::debug!("[SyncEngine] fetched {} highlights from {}", highlights.len(), adapter.source_key());
        Ok(highlights)
    }

    /// Returns the bound container id if the remote still has it; clears a
    /// stale binding otherwise.
    async fn verified_binding(&self, scope: BindingScope, key: &str) -> Result<Option<String>, SyncError> {
        let cached = match self.bindings.get(scope, key).await {
            Ok(cached) => cached,
            Err(e) => {
                tracing::warn!("failed to read container binding for {}: {}", key, e);
                None
            }
        };
        let Some(container_id) = cached else {
            return Ok(None);
        };

        if self.remote.container_exists(&container_id).await? {
            return Ok(Some(container_id));
        }

        tracing::info!("[SyncEngine] container {} for {} no longer exists", container_id, key);
        self.forget_binding(scope, key).await;
        Ok(None)
    }

    async fn store_binding(&self, scope: BindingScope, key: &str, container_id: &str) {
        if let Err(e) = self.bindings.set(scope, key, container_id).await {
            tracing::warn!("failed to store container binding for {}: {}", key, e);
        }
    }

    async fn forget_binding(&self, scope: BindingScope, key: &str) {
        if let Err(e) = self.bindings.clear(scope, key).await {
            tracing::warn!("failed to clear container binding for {}: {}", key, e);
        }
    }

    async fn last_sync(&self, source_key: &str, item_id: &str) -> Option<DateTime<Utc>> {
        match self.timestamps.last_sync(source_key, item_id).await {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!("failed to read last sync time for {}:{}: {}", source_key, item_id, e);
                None
            }
        }
    }

    async fn record_sync_time(&self, source_key: &str, item_id: &str, at: DateTime<Utc>) {
        if let Err(e) = self.timestamps.set_last_sync(source_key, item_id, at).await {
            log_ledger_error("record last sync time", source_key, item_id, e);
        }
    }

    async fn persist_records(&self, records: &[SyncedRecord], source_key: &str, item_id: &str) {
        if let Err(e) = self.ledger.save_records(records, source_key, item_id).await {
            log_ledger_error("save synced records", source_key, item_id, e);
        }
    }
}

fn merge(mut base: PropertyMap, extra: PropertyMap) -> PropertyMap {
    base.extend(extra);
    base
}
