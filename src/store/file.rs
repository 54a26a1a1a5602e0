//! JSON file-based snapshot store.
//!
//! All snapshots of one operator live in a single `snapshots-<operator>.json`
//! document. Every mutation re-reads the document under an exclusive advisory
//! lock, applies the change, and replaces the file via a temp file + rename,
//! so separate processes sharing the directory do not lose each other's keys.

use super::{sanitize_filename, SnapshotStore, StoreError};
use async_trait::async_trait;
use fs2::FileExt;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

type Document = BTreeMap<String, serde_json::Value>;

#[derive(Clone)]
pub struct FileSnapshotStore {
    path: PathBuf,
    lock_path: PathBuf,
    persist_lock: Arc<Mutex<()>>,
}

impl FileSnapshotStore {
    pub async fn new(base_dir: PathBuf, operator: &str) -> Result<Self, StoreError> {
        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StoreError::Io(format!("Failed to create snapshot store dir: {}", e)))?;
        let stem = format!("snapshots-{}", sanitize_filename(operator));
        Ok(Self {
            path: base_dir.join(format!("{}.json", stem)),
            lock_path: base_dir.join(format!("{}.lock", stem)),
            persist_lock: Arc::new(Mutex::new(())),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` over the document while holding the file lock.
    ///
    /// `f` returns whether the document changed; only then is it written back.
    async fn with_document<T, F>(&self, exclusive: bool, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Document) -> Result<(T, bool), StoreError> + Send + 'static,
    {
        let _guard = self.persist_lock.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();
        tokio::task::spawn_blocking(move || {
            let lock = open_lock(&lock_path)?;
            let locked = if exclusive {
                lock.lock_exclusive()
            } else {
                lock.lock_shared()
            };
            locked.map_err(|e| {
                StoreError::Io(format!("Failed to lock {}: {}", lock_path.display(), e))
            })?;

            let mut document = read_document(&path)?;
            let (result, changed) = f(&mut document)?;
            if changed {
                write_document(&path, &document)?;
            }
            // Lock released when `lock` drops.
            Ok::<_, StoreError>(result)
        })
        .await?
    }
}

fn open_lock(path: &Path) -> Result<File, StoreError> {
    OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)
        .map_err(|e| StoreError::Io(format!("Failed to open {}: {}", path.display(), e)))
}

fn read_document(path: &Path) -> Result<Document, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice::<Document>(&bytes) {
            Ok(document) => Ok(document),
            Err(e) => {
                tracing::warn!("Failed to parse snapshot store {}: {}", path.display(), e);
                Ok(Document::new())
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Document::new()),
        Err(err) => Err(StoreError::Io(format!(
            "Failed to read snapshot store {}: {}",
            path.display(),
            err
        ))),
    }
}

fn write_document(path: &Path, document: &Document) -> Result<(), StoreError> {
    let data = serde_json::to_vec_pretty(document).map_err(|e| StoreError::Encode {
        key: path.display().to_string(),
        message: e.to_string(),
    })?;
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, data)
        .map_err(|e| StoreError::Io(format!("Failed to write snapshot store: {}", e)))?;
    std::fs::rename(&tmp_path, path)
        .map_err(|e| StoreError::Io(format!("Failed to finalize snapshot store: {}", e)))?;
    tracing::debug!(path = %path.display(), keys = document.len(), "Persisted snapshot store");
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        let key = key.to_string();
        self.with_document(false, move |doc| Ok((doc.get(&key).cloned(), false)))
            .await
    }

    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let key = key.to_string();
        let value = value.clone();
        self.with_document(true, move |doc| {
            doc.insert(key, value);
            Ok(((), true))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.to_string();
        self.with_document(true, move |doc| {
            let removed = doc.remove(&key).is_some();
            Ok((removed, removed))
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.with_document(false, |doc| Ok((doc.keys().cloned().collect(), false)))
            .await
    }
}
