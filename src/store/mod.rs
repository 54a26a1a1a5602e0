//! Snapshot storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `file`: one JSON document per operator, rewritten atomically
//! - `sqlite`: SQLite database with a revision counter per key
//!
//! Stores are plain key-value collaborators: values are arbitrary JSON and
//! the store enforces no schema. Runs key their snapshot by procedure id.

mod file;
mod memory;
mod sqlite;

pub use file::FileSnapshotStore;
pub use memory::InMemorySnapshotStore;
pub use sqlite::SqliteSnapshotStore;

use async_trait::async_trait;
use std::path::PathBuf;
use std::str::FromStr;

/// Errors from a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(String),

    #[error("Failed to encode value for {key}: {message}")]
    Encode { key: String, message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Storage task failed: {0}")]
    Join(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Join(e.to_string())
    }
}

/// Sanitize a string for use as a filename.
pub fn sanitize_filename(value: &str) -> String {
    let out: String = value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() {
        "default".to_string()
    } else {
        out
    }
}

/// Snapshot store trait - implemented by all storage backends.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Fetch the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    /// Remove `key`. Returns whether anything was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// All stored keys, sorted.
    async fn keys(&self) -> Result<Vec<String>, StoreError>;
}

/// Snapshot store type selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreType {
    Memory,
    File,
    #[default]
    Sqlite,
}

impl FromStr for StoreType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" | "json" => Ok(Self::File),
            "sqlite" | "db" => Ok(Self::Sqlite),
            other => Err(format!("unknown store type {:?}", other)),
        }
    }
}

impl std::fmt::Display for StoreType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreType::Memory => write!(f, "memory"),
            StoreType::File => write!(f, "file"),
            StoreType::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Create a snapshot store based on type and configuration.
pub async fn create_snapshot_store(
    store_type: StoreType,
    base_dir: PathBuf,
    operator: &str,
) -> Result<Box<dyn SnapshotStore>, StoreError> {
    tracing::debug!(store = %store_type, dir = %base_dir.display(), operator, "Opening snapshot store");
    match store_type {
        StoreType::Memory => Ok(Box::new(InMemorySnapshotStore::new())),
        StoreType::File => {
            let store = FileSnapshotStore::new(base_dir, operator).await?;
            Ok(Box::new(store))
        }
        StoreType::Sqlite => {
            let store = SqliteSnapshotStore::new(base_dir, operator).await?;
            Ok(Box::new(store))
        }
    }
}
