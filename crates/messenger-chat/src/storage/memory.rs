//! In-memory backend.

use std::sync::{
    RwLock,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use messenger_core::{Backend, BackendError, Batch, PushKeyGenerator, Watch, WatchId, WatchRegistry};
use serde_json::{Map, Value};

use super::tree;

/// In-memory backend implementation.
///
/// Useful for tests and single-process deployments: share one instance
/// (behind an `Arc`) between several messengers and they see each other's
/// writes live. Data is lost on restart.
pub struct MemoryBackend {
    tree: RwLock<Value>,
    watchers: WatchRegistry,
    keys: PushKeyGenerator,
    available: AtomicBool,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_contents(Value::Object(Map::new()))
    }

    /// Create a backend holding `contents`.
    #[must_use]
    pub fn with_contents(contents: Value) -> Self {
        Self {
            tree: RwLock::new(contents),
            watchers: WatchRegistry::new(),
            keys: PushKeyGenerator::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining the backend.
    ///
    /// While unavailable every operation fails with `Unavailable`; going
    /// unavailable also ends every active watch with that error.
    pub fn set_available(&self, available: bool) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            tracing::warn!("memory backend marked unavailable");
            self.watchers
                .fail_all(&BackendError::Unavailable("backend offline".to_string()));
        } else if !was && available {
            tracing::info!("memory backend available again");
        }
    }

    /// Copy of the whole tree.
    ///
    /// # Errors
    /// Returns error if the tree lock is poisoned.
    pub fn snapshot(&self) -> Result<Value, BackendError> {
        Ok(self
            .tree
            .read()
            .map_err(|e| BackendError::Internal(e.to_string()))?
            .clone())
    }

    /// Number of active watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watchers.len()
    }

    fn ensure_available(&self) -> Result<(), BackendError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("backend offline".to_string()))
        }
    }

    /// The tree `batch` would produce, without committing it.
    #[cfg(feature = "file")]
    pub(crate) fn preview(&self, batch: &Batch) -> Result<Value, BackendError> {
        self.ensure_available()?;
        let mut next = self
            .tree
            .read()
            .map_err(|e| BackendError::Internal(e.to_string()))?
            .clone();
        apply_to(&mut next, batch.clone())?;
        Ok(next)
    }

    fn apply(&self, batch: Batch) -> Result<(), BackendError> {
        self.ensure_available()?;

        let mut root = self
            .tree
            .write()
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        let changed = apply_to(&mut root, batch)?;

        // Still under the write lock: watchers see commits in order.
        self.watchers
            .notify(&changed, |path| read_path(&root, path));
        Ok(())
    }
}

/// Check the preconditions of `batch`, then apply its writes to `root`.
/// Returns the written paths. `root` is untouched on error.
fn apply_to(root: &mut Value, batch: Batch) -> Result<Vec<String>, BackendError> {
    for (path, _) in &batch.writes {
        tree::segments(path)?;
    }

    for precondition in batch.preconditions {
        let segments = tree::segments(precondition.path())?;
        let current = tree::get(root, &segments).filter(|v| !tree::is_empty(v));
        if !precondition.holds(current) {
            return Err(BackendError::Conflict(precondition));
        }
    }

    let changed: Vec<String> = batch.writes.iter().map(|(path, _)| path.clone()).collect();
    for (path, value) in batch.writes {
        let segments = path.split('/').collect::<Vec<_>>();
        tree::set(root, &segments, value);
    }
    Ok(changed)
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn read_path(root: &Value, path: &str) -> Option<Value> {
    let segments = path.split('/').collect::<Vec<_>>();
    tree::get(root, &segments)
        .filter(|v| !tree::is_empty(v))
        .cloned()
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn write(&self, path: &str, value: Value) -> Result<(), BackendError> {
        self.apply(Batch::new().set(path, value))
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>, BackendError> {
        self.ensure_available()?;
        tree::segments(path)?;
        let root = self
            .tree
            .read()
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        Ok(read_path(&root, path))
    }

    async fn append_child(&self, path: &str, value: Value) -> Result<String, BackendError> {
        let key = self.keys.next_key();
        self.apply(Batch::new().set(format!("{path}/{key}"), value))?;
        Ok(key)
    }

    async fn commit(&self, batch: Batch) -> Result<(), BackendError> {
        self.apply(batch)
    }

    async fn watch(&self, path: &str) -> Result<Watch, BackendError> {
        self.ensure_available()?;
        tree::segments(path)?;
        let root = self
            .tree
            .read()
            .map_err(|e| BackendError::Internal(e.to_string()))?;
        Ok(self.watchers.register(path, read_path(&root, path)))
    }

    fn unwatch(&self, id: WatchId) {
        self.watchers.remove(id);
    }
}
