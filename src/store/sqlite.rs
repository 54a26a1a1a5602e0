//! SQLite-based snapshot store.

use super::{sanitize_filename, SnapshotStore, StoreError};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY NOT NULL,
    value TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_snapshots_updated_at ON snapshots(updated_at DESC);
"#;

pub struct SqliteSnapshotStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSnapshotStore {
    pub async fn new(base_dir: PathBuf, operator: &str) -> Result<Self, StoreError> {
        let db_path = base_dir.join(format!("snapshots-{}.db", sanitize_filename(operator)));

        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create snapshot store dir: {}", e)))?;

        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&db_path)?;
            conn.execute_batch(SCHEMA)?;
            Ok::<_, StoreError>(conn)
        })
        .await??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (tests and throwaway runs).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Number of writes recorded for `key` (0 when absent).
    pub async fn revision(&self, key: &str) -> Result<i64, StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let revision = conn
                .query_row(
                    "SELECT revision FROM snapshots WHERE key = ?1",
                    params![&key],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok::<_, StoreError>(revision.unwrap_or(0))
        })
        .await?
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM snapshots WHERE key = ?1",
                    params![&key],
                    |row| row.get(0),
                )
                .optional()?;
            Ok::<_, StoreError>(raw.and_then(|raw| match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(key = %key, "Stored snapshot is not valid JSON: {}", e);
                    None
                }
            }))
        })
        .await?
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        let raw = serde_json::to_string(value).map_err(|e| StoreError::Encode {
            key: key.clone(),
            message: e.to_string(),
        })?;
        let now = Utc::now().to_rfc3339();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            conn.execute(
                "INSERT INTO snapshots (key, value, updated_at, revision)
                 VALUES (?1, ?2, ?3, 1)
                 ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    updated_at = excluded.updated_at,
                    revision = snapshots.revision + 1",
                params![&key, &raw, &now],
            )?;
            Ok::<_, StoreError>(())
        })
        .await?
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.conn.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let removed = conn.execute("DELETE FROM snapshots WHERE key = ?1", params![&key])?;
            Ok::<_, StoreError>(removed > 0)
        })
        .await?
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            let mut stmt = conn.prepare("SELECT key FROM snapshots ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok::<_, StoreError>(keys)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn revision_counts_writes() {
        let store = SqliteSnapshotStore::open_in_memory().expect("open");
        assert_eq!(store.revision("pump").await.expect("revision"), 0);
        store.set("pump", &json!({"a": 1})).await.expect("set");
        store.set("pump", &json!({"a": 2})).await.expect("set");
        assert_eq!(store.revision("pump").await.expect("revision"), 2);
        assert_eq!(store.get("pump").await.expect("get"), Some(json!({"a": 2})));
    }

    #[tokio::test]
    async fn reopening_keeps_values_and_revisions() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SqliteSnapshotStore::new(dir.path().to_path_buf(), "north yard")
                .await
                .expect("open");
            store.set("pump", &json!({"started": true})).await.expect("set");
        }
        assert!(dir.path().join("snapshots-north_yard.db").exists());

        let store = SqliteSnapshotStore::new(dir.path().to_path_buf(), "north yard")
            .await
            .expect("reopen");
        assert_eq!(
            store.get("pump").await.expect("get"),
            Some(json!({"started": true}))
        );
        store.set("pump", &json!({})).await.expect("set");
        assert_eq!(store.revision("pump").await.expect("revision"), 2);
    }

    #[tokio::test]
    async fn invalid_stored_json_reads_as_absent() {
        let store = SqliteSnapshotStore::open_in_memory().expect("open");
        {
            let conn = store.conn.lock().await;
            conn.execute(
                "INSERT INTO snapshots (key, value, updated_at) VALUES ('bad', 'not json', 'now')",
                [],
            )
            .expect("insert");
        }
        assert_eq!(store.get("bad").await.expect("get"), None);
    }
}
