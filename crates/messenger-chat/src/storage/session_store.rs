//! Session persistence for one client instance.

use std::sync::RwLock;

use async_trait::async_trait;
use messenger_core::{BackendError, Session, SessionStore};

/// Keeps the session for the lifetime of the process only.
#[derive(Default)]
pub struct MemorySessionStore {
    session: RwLock<Option<Session>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self) -> Result<Option<Session>, BackendError> {
        Ok(self
            .session
            .read()
            .map_err(|e| BackendError::Internal(e.to_string()))?
            .clone())
    }

    async fn save(&self, session: &Session) -> Result<(), BackendError> {
        *self
            .session
            .write()
            .map_err(|e| BackendError::Internal(e.to_string()))? = Some(session.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        *self
            .session
            .write()
            .map_err(|e| BackendError::Internal(e.to_string()))? = None;
        Ok(())
    }
}

#[cfg(feature = "file")]
pub use file::FileSessionStore;

#[cfg(feature = "file")]
mod file {
    use std::path::PathBuf;

    use async_trait::async_trait;
    use messenger_core::{BackendError, Session, SessionStore};

    use crate::storage::file::{io_error, write_atomic};

    /// Persists the session as a small JSON file so it survives restarts.
    pub struct FileSessionStore {
        path: PathBuf,
    }

    impl FileSessionStore {
        /// Store the session at `path`.
        pub fn new(path: impl Into<PathBuf>) -> Self {
            Self { path: path.into() }
        }
    }

    #[async_trait]
    impl SessionStore for FileSessionStore {
        async fn load(&self) -> Result<Option<Session>, BackendError> {
            match tokio::fs::read(&self.path).await {
                Ok(bytes) => match serde_json::from_slice(&bytes) {
                    Ok(session) => Ok(Some(session)),
                    Err(e) => {
                        // An unreadable session only means signing in again.
                        tracing::warn!(path = %self.path.display(), error = %e, "discarding unreadable session");
                        Ok(None)
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(io_error(&self.path, &e)),
            }
        }

        async fn save(&self, session: &Session) -> Result<(), BackendError> {
            let bytes =
                serde_json::to_vec(session).map_err(|e| BackendError::Internal(e.to_string()))?;
            write_atomic(&self.path, &bytes).await
        }

        async fn clear(&self) -> Result<(), BackendError> {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_error(&self.path, &e)),
            }
        }
    }
}
