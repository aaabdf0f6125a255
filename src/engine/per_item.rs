//! One container per item; each highlight is a record in it.

use chrono::Utc;

use super::{PhaseTracker, Progress, SyncEngine, SyncPhase};
use crate::adapter::PerItemSourceAdapter;
use crate::blocks::RecordPayload;
use crate::error::SyncError;
use crate::model::SyncItem;
use crate::remote::{RemoteError, RemoteTarget};
use crate::state::{BindingScope, item_binding_key};
use crate::sync::{HighlightOutcome, SyncStats};

impl SyncEngine {
    pub(super) async fn sync_per_item_database(
        &self,
        adapter: &dyn PerItemSourceAdapter,
        item: &SyncItem,
        progress: Progress<'_>,
        phase: &mut PhaseTracker,
    ) -> Result<SyncStats, SyncError> {
        let source_key = adapter.source_key();
        let parent_id = self.require_remote_config()?;

        phase.enter(SyncPhase::EnsuringContainer);
        let (mut container_id, recreated) = self.ensure_item_container(adapter, item, parent_id).await?;
        // a fresh container holds nothing, so every highlight is created
        let mut full_resync = recreated;

        phase.enter(SyncPhase::Fetching);
        let highlights = self.fetch_highlights(adapter, progress).await?;

        let mut stats = SyncStats::default();
        if highlights.is_empty() {
            progress("No highlights to sync.");
        } else {
            phase.enter(SyncPhase::Mutating);
            let page_size = self.settings.per_item_page_size.max(1);
            for (batch, chunk) in highlights.chunks(page_size).enumerate() {
                if full_resync {
                    progress(&format!("Full sync batch {}, count: {}", batch + 1, chunk.len()));
                } else {
                    progress(&format!("Processing batch {}...", batch + 1));
                }

                for highlight in chunk {
                    let record = adapter.build_record(highlight);
                    let attempt = if full_resync {
                        self.remote
                            .create_record(&container_id, &record)
                            .await
                            .map(|_| HighlightOutcome::Appended)
                    } else {
                        self.upsert_record(&container_id, &highlight.uuid, &record).await
                    };

                    let outcome = match attempt {
                        Ok(outcome) => outcome,
                        Err(e) if e.is_container_missing() => {
                            tracing::warn!(
                                "[SyncEngine] container {} for {} disappeared mid-sync, recreating it",
                                container_id,
                                item.label()
                            );
                            container_id = self.recover_item_container(adapter, item, parent_id).await?;
                            full_resync = true;
                            self.remote.create_record(&container_id, &record).await?;
                            HighlightOutcome::Appended
                        }
                        Err(e) => return Err(e.into()),
                    };
                    outcome.record(&mut stats);
                }
            }
        }

        phase.enter(SyncPhase::Finalizing);
        self.record_sync_time(source_key, &item.item_id, Utc::now()).await;
        Ok(stats)
    }

    /// Returns the container id and whether it was created by this call.
    async fn ensure_item_container(
        &self,
        adapter: &dyn PerItemSourceAdapter,
        item: &SyncItem,
        parent_id: &str,
    ) -> Result<(String, bool), SyncError> {
        let key = item_binding_key(adapter.source_key(), &item.item_id);
        if let Some(id) = self.verified_binding(BindingScope::Item, &key).await? {
            return Ok((id, false));
        }

        let _guard = self.coordinator.begin(&key).await;
        if let Some(id) = self.verified_binding(BindingScope::Item, &key).await? {
            return Ok((id, false));
        }

        let title = adapter.per_item_container_title();
        let created = self
            .remote
            .create_container(&title, parent_id, &adapter.per_item_schema())
            .await?;
        tracing::info!("[SyncEngine] created per-item container '{}' ({})", title, created);
        self.store_binding(BindingScope::Item, &key, &created).await;
        Ok((created, true))
    }

    async fn recover_item_container(
        &self,
        adapter: &dyn PerItemSourceAdapter,
        item: &SyncItem,
        parent_id: &str,
    ) -> Result<String, SyncError> {
        let key = item_binding_key(adapter.source_key(), &item.item_id);
        self.forget_binding(BindingScope::Item, &key).await;
        let (container_id, _) = self.ensure_item_container(adapter, item, parent_id).await?;
        Ok(container_id)
    }

    async fn upsert_record(
        &self,
        container_id: &str,
        uuid: &str,
        record: &RecordPayload,
    ) -> Result<HighlightOutcome, RemoteError> {
        if let Some(record_id) = self.remote.find_record_by_uuid(container_id, uuid).await? {
            match self.remote.update_record(&record_id, record).await {
                Ok(()) => return Ok(HighlightOutcome::Updated),
                Err(e) if e.is_missing(RemoteTarget::Record) => {
                    tracing::debug!("[SyncEngine] record {} vanished, creating it again", record_id);
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.create_record(container_id, record).await?;
        Ok(HighlightOutcome::Appended)
    }
}
