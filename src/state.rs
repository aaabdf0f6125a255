//! Container bindings and last-sync timestamps.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::db::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingScope {
    /// All items of a source share one container.
    Source,
    /// One container per item.
    Item,
}

impl BindingScope {
    fn as_str(&self) -> &'static str {
        match self {
            BindingScope::Source => "source",
            BindingScope::Item => "item",
        }
    }
}

pub fn item_binding_key(source_key: &str, item_id: &str) -> String {
    format!("{source_key}:{item_id}")
}

/// Cached `key → remote container id`, written through to the database.
#[derive(Clone)]
pub struct DatabaseBindings {
    db: Arc<Database>,
    cache: Arc<RwLock<HashMap<(BindingScope, String), String>>>,
}

impl DatabaseBindings {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, scope: BindingScope, key: &str) -> Result<Option<String>> {
        let cache_key = (scope, key.to_string());
        if let Some(id) = self.cache.read().unwrap_or_else(|e| e.into_inner()).get(&cache_key) {
            return Ok(Some(id.clone()));
        }

        let query = "SELECT container_id FROM database_bindings WHERE scope = ? AND binding_key = ?";
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![scope.as_str(), key])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let id: String = row.get(0)?;
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(cache_key, id.clone());
        Ok(Some(id))
    }

    pub async fn set(&self, scope: BindingScope, key: &str, container_id: &str) -> Result<()> {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((scope, key.to_string()), container_id.to_string());

        let query = r#"
            INSERT INTO database_bindings (scope, binding_key, container_id)
            VALUES (?, ?, ?)
            ON CONFLICT(scope, binding_key) DO UPDATE SET
                container_id = excluded.container_id,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#;
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(query, libsql::params![scope.as_str(), key, container_id])
            .await?;
        Ok(())
    }

    pub async fn clear(&self, scope: BindingScope, key: &str) -> Result<()> {
        self.cache
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&(scope, key.to_string()));

        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(
                "DELETE FROM database_bindings WHERE scope = ? AND binding_key = ?",
                libsql::params![scope.as_str(), key],
            )
            .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct SyncTimestamps {
    db: Arc<Database>,
}

impl SyncTimestamps {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub async fn last_sync(&self, source_key: &str, item_id: &str) -> Result<Option<DateTime<Utc>>> {
        let query = "SELECT last_synced_at FROM sync_timestamps WHERE source_key = ? AND item_id = ?";
        let mut rows = self
            .db
            .connection()
            .query(query, libsql::params![source_key, item_id])
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let raw: String = row.get(0)?;
        let parsed = DateTime::parse_from_rfc3339(&raw)?.with_timezone(&Utc);
        Ok(Some(parsed))
    }

    pub async fn set_last_sync(&self, source_key: &str, item_id: &str, at: DateTime<Utc>) -> Result<()> {
        let query = r#"
            INSERT INTO sync_timestamps (source_key, item_id, last_synced_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source_key, item_id) DO UPDATE SET last_synced_at = excluded.last_synced_at
        "#;
        let _guard = self.db.write_lock().await;
        self.db
            .connection()
            .execute(query, libsql::params![source_key, item_id, at.to_rfc3339()])
            .await?;
        Ok(())
    }
}
