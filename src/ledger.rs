//! Local record of which highlights already live remotely, and under which
//! remote object id and change token.
//!
//! Lets the engine diff a page without listing its remote children.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use crate::db::Database;
use crate::model::SyncedRecord;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerSummary {
    pub source_key: String,
    pub item_id: String,
    pub records: i64,
    pub last_synced_at: Option<String>,
}

#[derive(Clone)]
pub struct SyncedRecordLedger {
    db: Arc<Database>,
}

impl SyncedRecordLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn get_records(&self, source_key: &str, item_id: &str) -> Result<Vec<SyncedRecord>> {
        let query = r#"
            SELECT uuid, remote_object_id, content_hash
            FROM synced_highlights
            WHERE source_key = ? AND item_id = ?
            ORDER BY uuid
        "#;

        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![source_key, item_id])
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(SyncedRecord {
                uuid: row.get(0)?,
                remote_object_id: row.get(1)?,
                content_hash: row.get(2)?,
            });
        }
        Ok(records)
    }

    /// Upserts by uuid in a single transaction.
    pub async fn save_records(&self, records: &[SyncedRecord], source_key: &str, item_id: &str) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let _guard = self.db.write_lock().await;
        let conn = self.db.connection();
        conn.execute("BEGIN TRANSACTION", ()).await?;

        let result = self.save_records_internal(records, source_key, item_id).await;

        match result {
            Ok(_) => {
                conn.execute("COMMIT", ()).await?;
                tracing::debug!("[ledger] saved {} records for {}:{}", records.len(), source_key, item_id);
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(e)
            }
        }
    }

    async fn save_records_internal(&self, records: &[SyncedRecord], source_key: &str, item_id: &str) -> Result<()> {
        let upsert = r#"
            INSERT INTO synced_highlights (source_key, item_id, uuid, remote_object_id, content_hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(source_key, item_id, uuid) DO UPDATE SET
                remote_object_id = excluded.remote_object_id,
                content_hash = excluded.content_hash,
                synced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#;

        for record in records {
            self.db
                .connection()
                .execute(
                    upsert,
                    libsql::params![
                        source_key,
                        item_id,
                        record.uuid.as_str(),
                        record.remote_object_id.as_str(),
                        record.content_hash.as_str()
                    ],
                )
                .await?;
        }
        Ok(())
    }

    /// Returns false when no record exists for the uuid.
    pub async fn update_content_hash(&self, source_key: &str, item_id: &str, uuid: &str, new_hash: &str) -> Result<bool> {
        let query = r#"
            UPDATE synced_highlights
            SET content_hash = ?, synced_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            WHERE source_key = ? AND item_id = ? AND uuid = ?
        "#;

        let _guard = self.db.write_lock().await;
        let changed = self
            .db
            .connection()
            .execute(query, libsql::params![new_hash, source_key, item_id, uuid])
            .await?;
        if changed == 0 {
            tracing::warn!("[ledger] record not found for update: {}:{}:{}", source_key, item_id, uuid);
        }
        Ok(changed > 0)
    }

    pub async fn record_count(&self, source_key: &str, item_id: &str) -> Result<i64> {
        let query = "SELECT COUNT(*) FROM synced_highlights WHERE source_key = ? AND item_id = ?";
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![source_key, item_id])
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get(0)?),
            None => Ok(0),
        }
    }

    pub async fn clear_records(&self, source_key: &str, item_id: &str) -> Result<u64> {
        let _guard = self.db.write_lock().await;
        let removed = self
            .db
            .connection()
            .execute(
                "DELETE FROM synced_highlights WHERE source_key = ? AND item_id = ?",
                libsql::params![source_key, item_id],
            )
            .await?;
        tracing::info!("[ledger] cleared {} records for {}:{}", removed, source_key, item_id);
        Ok(removed)
    }

    pub async fn clear_source(&self, source_key: &str) -> Result<u64> {
        let _guard = self.db.write_lock().await;
        let removed = self
            .db
            .connection()
            .execute("DELETE FROM synced_highlights WHERE source_key = ?", libsql::params![source_key])
            .await?;
        tracing::info!("[ledger] cleared all {} records for {}", removed, source_key);
        Ok(removed)
    }

    pub async fn summaries(&self) -> Result<Vec<LedgerSummary>> {
        let query = r#"
            SELECT h.source_key, h.item_id, COUNT(*) AS records, t.last_synced_at
            FROM synced_highlights h
            LEFT JOIN sync_timestamps t
                ON t.source_key = h.source_key AND t.item_id = h.item_id
            GROUP BY h.source_key, h.item_id
            ORDER BY h.source_key, h.item_id
        "#;

        let mut rows = self.db.connection().query(query, ()).await?;
        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await? {
            summaries.push(LedgerSummary {
                source_key: row.get(0)?,
                item_id: row.get(1)?,
                records: row.get(2)?,
                last_synced_at: row.get::<Option<String>>(3)?,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ledger() -> (tempfile::TempDir, SyncedRecordLedger) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_local(dir.path().join("ledger.db")).await.unwrap();
        (dir, SyncedRecordLedger::new(Arc::new(db)))
    }

    #[tokio::test]
    async fn test_save_records_upserts_by_uuid() {
        let (_dir, ledger) = ledger().await;
        ledger
            .save_records(
                &[SyncedRecord::new("a", "block-a", "h1"), SyncedRecord::new("b", "block-b", "h2")],
                "appleBooks",
                "book-1",
            )
            .await
            .unwrap();
        ledger
            .save_records(&[SyncedRecord::new("a", "block-a2", "h3")], "appleBooks", "book-1")
            .await
            .unwrap();

        let records = ledger.get_records("appleBooks", "book-1").await.unwrap();
        assert_eq!(
            records,
            vec![SyncedRecord::new("a", "block-a2", "h3"), SyncedRecord::new("b", "block-b", "h2")]
        );
    }

    #[tokio::test]
    async fn test_records_are_scoped_by_source_and_item() {
        let (_dir, ledger) = ledger().await;
        ledger
            .save_records(&[SyncedRecord::new("a", "x", "h")], "appleBooks", "book-1")
            .await
            .unwrap();
        ledger
            .save_records(&[SyncedRecord::new("a", "y", "h")], "goodLinks", "book-1")
            .await
            .unwrap();

        assert_eq!(ledger.record_count("appleBooks", "book-1").await.unwrap(), 1);
        assert_eq!(ledger.record_count("appleBooks", "book-2").await.unwrap(), 0);
        assert_eq!(ledger.get_records("goodLinks", "book-1").await.unwrap()[0].remote_object_id, "y");
    }

    #[tokio::test]
    async fn test_update_content_hash() {
        let (_dir, ledger) = ledger().await;
        ledger
            .save_records(&[SyncedRecord::new("a", "x", "old")], "weRead", "b")
            .await
            .unwrap();

        assert!(ledger.update_content_hash("weRead", "b", "a", "new").await.unwrap());
        assert!(!ledger.update_content_hash("weRead", "b", "missing", "new").await.unwrap());
        assert_eq!(ledger.get_records("weRead", "b").await.unwrap()[0].content_hash, "new");
    }

    #[tokio::test]
    async fn test_clear_and_summaries() {
        let (_dir, ledger) = ledger().await;
        ledger
            .save_records(&[SyncedRecord::new("a", "x", "h"), SyncedRecord::new("b", "y", "h")], "dedao", "1")
            .await
            .unwrap();
        ledger
            .save_records(&[SyncedRecord::new("c", "z", "h")], "dedao", "2")
            .await
            .unwrap();

        let summaries = ledger.summaries().await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].records, 2);
        assert_eq!(summaries[0].last_synced_at, None);

        assert_eq!(ledger.clear_records("dedao", "1").await.unwrap(), 2);
        assert_eq!(ledger.clear_source("dedao").await.unwrap(), 1);
        assert!(ledger.summaries().await.unwrap().is_empty());
    }
}
