//! Full-snapshot fan-out for backend watches.

use std::{
    collections::HashMap,
    fmt,
    sync::{PoisonError, RwLock},
};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::BackendError;

/// Watch identifier.
pub type WatchId = Uuid;

/// One delivery: the whole subtree (`None` when empty) or the failure that
/// ended the watch.
pub type WatchEvent = Result<Option<Value>, BackendError>;

/// Receiving side of a backend watch.
///
/// The stream ends after an `Err` event or once the watch is removed.
pub struct Watch {
    id: WatchId,
    rx: mpsc::UnboundedReceiver<WatchEvent>,
}

impl Watch {
    /// Identifier to pass to `Backend::unwatch`.
    #[must_use]
    pub const fn id(&self) -> WatchId {
        self.id
    }

    /// Wait for the next snapshot.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    /// Consume the watch as a stream of snapshots.
    #[must_use]
    pub fn into_stream(self) -> futures::stream::BoxStream<'static, WatchEvent> {
        UnboundedReceiverStream::new(self.rx).boxed()
    }
}

impl fmt::Debug for Watch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watch").field("id", &self.id).finish_non_exhaustive()
    }
}

struct Watcher {
    path: String,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

/// Registry of active watches for one backend.
///
/// Backends call [`WatchRegistry::register`] and [`WatchRegistry::notify`]
/// while holding their own data lock, so each watcher observes snapshots in
/// commit order and never misses a change between its initial snapshot and
/// registration.
#[derive(Default)]
pub struct WatchRegistry {
    watchers: RwLock<HashMap<WatchId, Watcher>>,
}

impl WatchRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a watch on `path` and queue `initial` as its first event.
    pub fn register(&self, path: &str, initial: Option<Value>) -> Watch {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(Ok(initial));

        let id = Uuid::new_v4();
        self.watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                id,
                Watcher {
                    path: path.to_string(),
                    tx,
                },
            );
        tracing::trace!(%id, path, "watch registered");
        Watch { id, rx }
    }

    /// Remove a watch. Returns whether it was registered.
    pub fn remove(&self, id: WatchId) -> bool {
        let removed = self
            .watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id)
            .is_some();
        if removed {
            tracing::trace!(%id, "watch removed");
        }
        removed
    }

    /// Send a fresh snapshot to every watcher whose subtree overlaps one of
    /// `changed`. `read` returns the current value at a watched path.
    pub fn notify<F>(&self, changed: &[String], read: F)
    where
        F: Fn(&str) -> Option<Value>,
    {
        let mut closed = Vec::new();
        {
            let watchers = self.watchers.read().unwrap_or_else(PoisonError::into_inner);
            for (id, watcher) in watchers.iter() {
                if !changed.iter().any(|path| overlaps(&watcher.path, path)) {
                    continue;
                }
                if watcher.tx.send(Ok(read(&watcher.path))).is_err() {
                    closed.push(*id);
                }
            }
        }
        for id in closed {
            self.remove(id);
        }
    }

    /// End every watch with `err`.
    pub fn fail_all(&self, err: &BackendError) {
        let drained: Vec<Watcher> = self
            .watchers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, watcher)| watcher)
            .collect();
        tracing::debug!(count = drained.len(), error = %err, "failing all watches");
        for watcher in drained {
            let _ = watcher.tx.send(Err(err.clone()));
        }
    }

    /// Number of active watches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.watchers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no watch is active.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Whether a change at `changed` can affect the subtree at `watched`.
fn overlaps(watched: &str, changed: &str) -> bool {
    fn is_under(path: &str, ancestor: &str) -> bool {
        path.strip_prefix(ancestor)
            .is_some_and(|rest| rest.starts_with('/'))
    }
    watched == changed || is_under(watched, changed) || is_under(changed, watched)
}
