//! All items of a source share one container; each item is a page and each
//! highlight a block on it.

use chrono::Utc;
use serde_json::json;
use std::collections::HashMap;

use super::{PhaseTracker, Progress, SyncEngine, SyncPhase, merge};
use crate::adapter::SourceAdapter;
use crate::blocks::HighlightBlock;
use crate::error::SyncError;
use crate::fingerprint::{change_token, format_date};
use crate::model::{SyncItem, SyncedRecord, UnifiedHighlight};
use crate::remote::{PropertyMap, RemoteError, RemoteTarget};
use crate::state::BindingScope;
use crate::sync::{HighlightOutcome, SyncStats, is_unchanged, log_ledger_error, progress_line};

fn base_schema() -> PropertyMap {
    let mut schema = PropertyMap::new();
    schema.insert("Last Sync Time".into(), json!({ "date": {} }));
    schema.insert("Highlight Count".into(), json!({ "number": {} }));
    schema
}

/// Everything a diff pass needs to know about the item being synced.
struct PageContext<'a> {
    page_id: &'a str,
    item_id: &'a str,
    source_key: &'a str,
    prefer_modified: bool,
}

impl PageContext<'_> {
    fn block_for(&self, highlight: &UnifiedHighlight) -> HighlightBlock {
        let token = change_token(highlight, self.source_key, self.prefer_modified);
        HighlightBlock::build(highlight, self.item_id, self.source_key, token)
    }
}

impl SyncEngine {
    pub(super) async fn sync_single_database(
        &self,
        adapter: &dyn SourceAdapter,
        item: &SyncItem,
        incremental: bool,
        progress: Progress<'_>,
        phase: &mut PhaseTracker,
    ) -> Result<SyncStats, SyncError> {
        let source_key = adapter.source_key();
        let parent_id = self.require_remote_config()?;

        let (page_id, created) = self.ensure_container_and_page(adapter, item, parent_id, phase).await?;

        let extra = adapter.additional_item_properties();
        if !extra.is_empty() {
            self.remote.update_page_properties(&page_id, &extra).await?;
        }

        phase.enter(SyncPhase::Fetching);
        let highlights = self.fetch_highlights(adapter, progress).await?;

        let ctx = PageContext {
            page_id: &page_id,
            item_id: &item.item_id,
            source_key,
            prefer_modified: adapter.prefers_modification_token(),
        };

        let mut stats = SyncStats::default();
        if highlights.is_empty() {
            progress("No highlights to sync.");
        } else if created {
            phase.enter(SyncPhase::Mutating);
            let blocks: Vec<HighlightBlock> = highlights.iter().map(|h| ctx.block_for(h)).collect();
            progress(&format!("Adding {} highlights...", blocks.len()));
            stats.appended = self.append_blocks(&ctx, &blocks, 0, blocks.len(), progress).await?;
        } else {
            stats = self
                .sync_existing_page(&ctx, &highlights, incremental, progress, phase)
                .await?;
        }

        phase.enter(SyncPhase::Finalizing);
        let now = Utc::now();
        let mut properties = PropertyMap::new();
        properties.insert("Highlight Count".into(), json!({ "number": highlights.len() }));
        properties.insert("Last Sync Time".into(), json!({ "date": { "start": format_date(&now) } }));
        self.remote.update_page_properties(&page_id, &properties).await?;
        self.record_sync_time(source_key, &item.item_id, now).await;

        Ok(stats)
    }

    /// Resolves the container, its schema and the item page. A container
    /// reported missing by the schema or page call is resolved again once.
    async fn ensure_container_and_page(
        &self,
        adapter: &dyn SourceAdapter,
        item: &SyncItem,
        parent_id: &str,
        phase: &mut PhaseTracker,
    ) -> Result<(String, bool), SyncError> {
        let source_key = adapter.source_key();
        let schema = merge(base_schema(), adapter.additional_schema_fields());

        phase.enter(SyncPhase::EnsuringContainer);
        let container_id = self.ensure_source_container(adapter, parent_id).await?;
        let first = self
            .ensure_schema_and_page(&container_id, &schema, item, adapter.page_header(), phase)
            .await;
        match first {
            Err(e) if e.is_container_missing() => {
                tracing::warn!(
                    "[SyncEngine] container {} for {} disappeared, resolving it again",
                    container_id,
                    source_key
                );
                self.forget_binding(BindingScope::Source, source_key).await;

                phase.enter(SyncPhase::EnsuringContainer);
                let container_id = self.ensure_source_container(adapter, parent_id).await?;
                Ok(self
                    .ensure_schema_and_page(&container_id, &schema, item, adapter.page_header(), phase)
                    .await?)
            }
            result => Ok(result?),
        }
    }

    async fn ensure_schema_and_page(
        &self,
        container_id: &str,
        schema: &PropertyMap,
        item: &SyncItem,
        header: Option<&str>,
        phase: &mut PhaseTracker,
    ) -> Result<(String, bool), RemoteError> {
        self.remote.ensure_schema_fields(container_id, schema).await?;
        phase.enter(SyncPhase::EnsuringItemPage);
        self.ensure_item_page(container_id, item, header).await
    }

    /// Resolves the shared container for a source, creating it at most once
    /// across concurrent syncs.
    async fn ensure_source_container(&self, adapter: &dyn SourceAdapter, parent_id: &str) -> Result<String, SyncError> {
        let source_key = adapter.source_key();
        if let Some(id) = self.verified_binding(BindingScope::Source, source_key).await? {
            return Ok(id);
        }

        let _guard = self.coordinator.begin(source_key).await;

        // another sync may have resolved it while we waited
        if let Some(id) = self.verified_binding(BindingScope::Source, source_key).await? {
            return Ok(id);
        }

        let title = adapter.container_title();
        if let Some(found) = self.remote.find_container_by_title(title, parent_id).await? {
            tracing::info!("[SyncEngine] found existing container '{}' for {}", title, source_key);
            self.store_binding(BindingScope::Source, source_key, &found).await;
            return Ok(found);
        }

        let schema = merge(base_schema(), adapter.additional_schema_fields());
        let created = self.remote.create_container(title, parent_id, &schema).await?;
        tracing::info!("[SyncEngine] created container '{}' ({}) for {}", title, created, source_key);
        self.store_binding(BindingScope::Source, source_key, &created).await;
        Ok(created)
    }

    /// Returns the page id and whether it was just created.
    async fn ensure_item_page(
        &self,
        container_id: &str,
        item: &SyncItem,
        header: Option<&str>,
    ) -> Result<(String, bool), RemoteError> {
        if let Some(page_id) = self.remote.find_page_by_item_id(container_id, &item.item_id).await? {
            return Ok((page_id, false));
        }
        let page_id = self.remote.create_page(container_id, item, header).await?;
        tracing::debug!("[SyncEngine] created page {} for {}", page_id, item.item_id);
        Ok((page_id, true))
    }

    async fn sync_existing_page(
        &self,
        ctx: &PageContext<'_>,
        highlights: &[UnifiedHighlight],
        incremental: bool,
        progress: Progress<'_>,
        phase: &mut PhaseTracker,
    ) -> Result<SyncStats, SyncError> {
        let mut stats = SyncStats::default();

        progress("Scanning existing highlights...");
        let known = self.known_records(ctx, progress).await?;
        let last_sync = if incremental {
            self.last_sync(ctx.source_key, ctx.item_id).await
        } else {
            None
        };

        phase.enter(SyncPhase::Diffing);
        let mut to_update: Vec<(String, HighlightBlock)> = Vec::new();
        let mut to_append: Vec<HighlightBlock> = Vec::new();
        for highlight in highlights {
            let Some(record) = known.get(&highlight.uuid) else {
                to_append.push(ctx.block_for(highlight));
                continue;
            };

            // untouched since the last successful pass
            if let (Some(last), Some(modified)) = (last_sync, highlight.date_modified) {
                if modified < last {
                    HighlightOutcome::Unchanged.record(&mut stats);
                    continue;
                }
            }

            let block = ctx.block_for(highlight);
            if is_unchanged(Some(&record.content_hash), &block.token) {
                HighlightOutcome::Unchanged.record(&mut stats);
                continue;
            }
            to_update.push((record.remote_object_id.clone(), block));
        }
        tracing::debug!(
            "[SyncEngine] {}:{} diff: {} to update, {} to append, {} unchanged",
            ctx.source_key,
            ctx.item_id,
            to_update.len(),
            to_append.len(),
            stats.unchanged
        );

        phase.enter(SyncPhase::Mutating);
        let total = to_update.len() + to_append.len();
        let mut done = 0;

        if !to_update.is_empty() {
            progress(&format!("Updating {} existing highlights...", to_update.len()));
        }
        let update_total = to_update.len();
        for (processed, (block_id, block)) in to_update.into_iter().enumerate() {
            let last = processed + 1 == update_total;
            match self.remote.update_block_content(&block_id, &block).await {
                Ok(()) => {
                    if let Err(e) = self
                        .ledger
                        .update_content_hash(ctx.source_key, ctx.item_id, &block.uuid, &block.token)
                        .await
                    {
                        log_ledger_error("update content hash", ctx.source_key, ctx.item_id, e);
                    }
                    HighlightOutcome::Updated.record(&mut stats);
                    done += 1;
                    if done % 10 == 0 || last {
                        progress(&progress_line("Updating", done, total));
                    }
                }
                Err(e) if e.is_missing(RemoteTarget::Block) => {
                    tracing::debug!("[SyncEngine] block {} for {} is gone, appending instead", block_id, block.uuid);
                    to_append.push(block);
                    if last && done > 0 {
                        progress(&progress_line("Updating", done, total));
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !to_append.is_empty() {
            progress(&format!("Appending {} new highlights...", to_append.len()));
            stats.appended += self.append_blocks(ctx, &to_append, done, total, progress).await?;
        }

        Ok(stats)
    }

    /// Ledger records for the page, or markers listed from the remote page
    /// when the ledger has none. Listed markers are saved to the ledger.
    async fn known_records(
        &self,
        ctx: &PageContext<'_>,
        progress: Progress<'_>,
    ) -> Result<HashMap<String, SyncedRecord>, SyncError> {
        let records = match self.ledger.get_records(ctx.source_key, ctx.item_id).await {
            Ok(records) => records,
            Err(e) => {
                log_ledger_error("read synced records", ctx.source_key, ctx.item_id, e);
                Vec::new()
            }
        };
        if !records.is_empty() {
            return Ok(records.into_iter().map(|r| (r.uuid.clone(), r)).collect());
        }

        progress("No local records, scanning remote page...");
        let markers = self.remote.list_existing_highlight_markers(ctx.page_id).await?;
        let seeded: Vec<SyncedRecord> = markers
            .into_iter()
            .map(|(uuid, marker)| SyncedRecord::new(uuid, marker.block_id, marker.token.unwrap_or_default()))
            .collect();
        tracing::debug!(
            "[SyncEngine] seeding ledger for {}:{} with {} listed markers",
            ctx.source_key,
            ctx.item_id,
            seeded.len()
        );
        self.persist_records(&seeded, ctx.source_key, ctx.item_id).await;

        Ok(seeded.into_iter().map(|r| (r.uuid.clone(), r)).collect())
    }

    /// Looks the blocks of an appended chunk up on the page by their uuid
    /// markers. Fails if any of them cannot be found.
    async fn recover_appended_ids(
        &self,
        ctx: &PageContext<'_>,
        chunk: &[HighlightBlock],
    ) -> Result<Vec<SyncedRecord>, SyncError> {
        let markers = self.remote.list_existing_highlight_markers(ctx.page_id).await?;
        let mut records = Vec::with_capacity(chunk.len());
        for block in chunk {
            let Some(marker) = markers.get(&block.uuid) else {
                return Err(RemoteError::Transport(format!(
                    "appended block for {} is missing from page {}",
                    block.uuid, ctx.page_id
                ))
                .into());
            };
            records.push(SyncedRecord::new(
                block.uuid.as_str(),
                marker.block_id.as_str(),
                block.token.as_str(),
            ));
        }
        Ok(records)
    }

    /// Appends in batches, saving each batch's block ids to the ledger as soon
    /// as the remote returns them. Returns the number of blocks appended.
    async fn append_blocks(
        &self,
        ctx: &PageContext<'_>,
        blocks: &[HighlightBlock],
        done_before: usize,
        total: usize,
        progress: Progress<'_>,
    ) -> Result<usize, SyncError> {
        let mut appended = 0;
        for chunk in blocks.chunks(self.settings.append_batch_size.max(1)) {
            let ids = self.remote.append_blocks_and_get_ids(ctx.page_id, chunk).await?;
            let records: Vec<SyncedRecord> = if ids.len() == chunk.len() {
                chunk
                    .iter()
                    .zip(ids)
                    .map(|(block, id)| SyncedRecord::new(block.uuid.as_str(), id, block.token.as_str()))
                    .collect()
            } else {
                tracing::warn!(
                    "[SyncEngine] remote returned {} ids for {} appended blocks on {}, reading them back",
                    ids.len(),
                    chunk.len(),
                    ctx.page_id
                );
                self.recover_appended_ids(ctx, chunk).await?
            };
            self.persist_records(&records, ctx.source_key, ctx.item_id).await;

            appended += chunk.len();
            progress(&progress_line("Syncing", done_before + appended, total));
        }
        Ok(appended)
    }
}
