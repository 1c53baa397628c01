//! JSON-file backend (feature-gated).
//!
//! The local key-value store variant: the whole tree lives in memory and is
//! written back to one JSON document on every mutation. A mutation becomes
//! visible to readers and watchers only after the document is on disk.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use messenger_core::{Backend, BackendError, Batch, PushKeyGenerator, Watch, WatchId};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use super::MemoryBackend;

/// File-backed storage implementation.
pub struct FileBackend {
    inner: MemoryBackend,
    path: PathBuf,
    keys: PushKeyGenerator,
    write_lock: Mutex<()>,
}

impl FileBackend {
    /// Open (or create) the document at `path`.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, BackendError> {
        let path = path.into();
        let contents = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| BackendError::Corrupt(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(e) => return Err(io_error(&path, &e)),
        };
        tracing::debug!(path = %path.display(), "opened file backend");

        Ok(Self {
            inner: MemoryBackend::with_contents(contents),
            path,
            keys: PushKeyGenerator::new(),
            write_lock: Mutex::new(()),
        })
    }

    /// Location of the document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the tree `batch` produces to disk, then commit it in memory.
    ///
    /// All mutations go through here under `write_lock`, so the in-memory
    /// commit applies to the same tree the preview was taken from.
    async fn commit_durably(&self, batch: Batch) -> Result<(), BackendError> {
        let _guard = self.write_lock.lock().await;
        let next = self.inner.preview(&batch)?;
        let bytes =
            serde_json::to_vec_pretty(&next).map_err(|e| BackendError::Internal(e.to_string()))?;
        write_atomic(&self.path, &bytes).await.inspect_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "persist failed, change dropped");
        })?;
        self.inner.commit(batch).await
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), BackendError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_error(parent, &e))?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| io_error(&tmp, &e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| io_error(path, &e))
}

pub(crate) fn io_error(path: &Path, err: &std::io::Error) -> BackendError {
    BackendError::Unavailable(format!("{}: {err}", path.display()))
}

#[async_trait]
impl Backend for FileBackend {
    async fn write(&self, path: &str, value: Value) -> Result<(), BackendError> {
        self.commit_durably(Batch::new().set(path, value)).await
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>, BackendError> {
        self.inner.read_once(path).await
    }

    async fn append_child(&self, path: &str, value: Value) -> Result<String, BackendError> {
        let key = self.keys.next_key();
        self.commit_durably(Batch::new().set(format!("{path}/{key}"), value))
            .await?;
        Ok(key)
    }

    async fn commit(&self, batch: Batch) -> Result<(), BackendError> {
        self.commit_durably(batch).await
    }

    async fn watch(&self, path: &str) -> Result<Watch, BackendError> {
        self.inner.watch(path).await
    }

    fn unwatch(&self, id: WatchId) {
        self.inner.unwatch(id);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let backend = FileBackend::open(&path).await.unwrap();
        backend.write("users/alice", json!({"avatar": "a"})).await.unwrap();
        let key = backend.append_child("messages/c", json!("hi")).await.unwrap();
        drop(backend);

        let reopened = FileBackend::open(&path).await.unwrap();
        assert_eq!(
            reopened.read_once("users/alice").await.unwrap(),
            Some(json!({"avatar": "a"}))
        );
        let messages = reopened.read_once("messages/c").await.unwrap().unwrap();
        assert_eq!(messages[&key], json!("hi"));
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path().join("nested/db.json")).await.unwrap();
        assert_eq!(backend.read_once("users/alice").await.unwrap(), None);

        backend.write("users/alice", json!(1)).await.unwrap();
        assert!(backend.path().is_file());
    }

    #[tokio::test]
    async fn test_corrupt_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            FileBackend::open(&path).await,
            Err(BackendError::Corrupt(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_persist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let backend = FileBackend::open(&path).await.unwrap();

        let result = backend
            .commit(Batch::new().require_equals("users/a", json!(1)).set("users/a", json!(2)))
            .await;
        assert!(matches!(result, Err(BackendError::Conflict(_))));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_failed_persist_is_not_visible() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let backend = FileBackend::open(data.join("db.json")).await.unwrap();
        let mut watch = backend.watch("messages/c").await.unwrap();
        assert_eq!(watch.next().await, Some(Ok(None)));

        // A file where the data directory should be makes every persist fail.
        std::fs::write(&data, b"not a directory").unwrap();
        assert!(matches!(
            backend.append_child("messages/c", json!("hi")).await,
            Err(BackendError::Unavailable(_))
        ));
        assert_eq!(backend.read_once("messages/c").await.unwrap(), None);

        std::fs::remove_file(&data).unwrap();
        let key = backend.append_child("messages/c", json!("hi")).await.unwrap();
        let all = backend.read_once("messages/c").await.unwrap().unwrap();
        assert_eq!(all, json!({ key.clone(): "hi" }));
        // The failed attempt was never announced.
        assert_eq!(watch.next().await, Some(Ok(Some(json!({ key: "hi" })))));
    }
}
