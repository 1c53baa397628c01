//! Core traits for backends and session persistence.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{Session, Watch, WatchId};

/// Condition a [`Batch`] checks before applying its writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// Nothing is stored at the path.
    Absent(String),
    /// The path holds exactly this value.
    Equals(String, Value),
}

impl Precondition {
    /// Path the condition refers to.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Absent(path) | Self::Equals(path, _) => path,
        }
    }

    /// Whether `current` satisfies the condition.
    #[must_use]
    pub fn holds(&self, current: Option<&Value>) -> bool {
        match self {
            Self::Absent(_) => current.is_none(),
            Self::Equals(_, expected) => current == Some(expected),
        }
    }
}

/// Atomic multi-path write.
///
/// Either every precondition holds and every write becomes visible in one
/// step, or nothing changes and the first failed precondition is reported.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub preconditions: Vec<Precondition>,
    /// `None` removes the path.
    pub writes: Vec<(String, Option<Value>)>,
}

impl Batch {
    /// Create an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Require that nothing is stored at `path`.
    #[must_use]
    pub fn require_absent(mut self, path: impl Into<String>) -> Self {
        self.preconditions.push(Precondition::Absent(path.into()));
        self
    }

    /// Require that `path` holds `value`.
    #[must_use]
    pub fn require_equals(mut self, path: impl Into<String>, value: Value) -> Self {
        self.preconditions
            .push(Precondition::Equals(path.into(), value));
        self
    }

    /// Store `value` at `path`.
    #[must_use]
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.writes.push((path.into(), Some(value)));
        self
    }

    /// Remove whatever is stored at `path`.
    #[must_use]
    pub fn remove(mut self, path: impl Into<String>) -> Self {
        self.writes.push((path.into(), None));
        self
    }
}

/// Backend error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("Precondition failed at {}", .0.path())]
    Conflict(Precondition),
    #[error("Invalid path: {0:?}")]
    InvalidPath(String),
    #[error("Corrupt data: {0}")]
    Corrupt(String),
    #[error("Backend error: {0}")]
    Internal(String),
}

/// Persistence and change-notification backend.
///
/// Implementable as a hosted realtime database, a local key-value store or
/// an in-memory fake. Paths are `/`-separated; values are JSON trees and a
/// path holding an empty tree counts as absent.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Replace the value at `path`.
    async fn write(&self, path: &str, value: Value) -> Result<(), BackendError>;

    /// Read the current value at `path` once.
    async fn read_once(&self, path: &str) -> Result<Option<Value>, BackendError>;

    /// Store `value` under a freshly generated child key of `path`.
    ///
    /// Keys generated by one writer sort strictly increasing.
    async fn append_child(&self, path: &str, value: Value) -> Result<String, BackendError>;

    /// Apply a [`Batch`] atomically.
    async fn commit(&self, batch: Batch) -> Result<(), BackendError>;

    /// Watch the subtree at `path`.
    ///
    /// The first event is the current value; every later change to the
    /// subtree delivers the whole subtree again.
    async fn watch(&self, path: &str) -> Result<Watch, BackendError>;

    /// Stop a watch. Unknown ids are ignored.
    fn unwatch(&self, id: WatchId);
}

/// Client-local persistence for the signed-in session.
///
/// Owned by exactly one client instance; never shared.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load the persisted session.
    async fn load(&self) -> Result<Option<Session>, BackendError>;

    /// Persist `session`, replacing any previous one.
    async fn save(&self, session: &Session) -> Result<(), BackendError>;

    /// Forget the persisted session.
    async fn clear(&self) -> Result<(), BackendError>;
}
