//! Session manager: which identity this client instance is signed in as.

use std::sync::Arc;

use messenger_core::{ChatError, Identity, Session, SessionStore};
use tokio::sync::RwLock;

/// Tracks the current session of one client instance.
///
/// Concurrent `start` calls race and the last one wins.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    current: RwLock<Option<Session>>,
}

impl SessionManager {
    /// Create a manager persisting through `store`. Nothing is loaded until
    /// [`SessionManager::restore`] is called.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            current: RwLock::new(None),
        }
    }

    /// Load the persisted session and make it current.
    ///
    /// Only the local session store is read; the backend is not contacted.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the session store cannot be read.
    pub async fn restore(&self) -> Result<Option<Session>, ChatError> {
        let session = self.store.load().await?;
        if let Some(ref s) = session {
            tracing::info!(handle = %s.handle, "restored session");
        }
        *self.current.write().await = session.clone();
        Ok(session)
    }

    /// Persist a session for `identity` and make it current.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the session cannot be persisted; the
    /// current session is left unchanged in that case.
    pub async fn start(&self, identity: &Identity) -> Result<Session, ChatError> {
        let session = Session::for_identity(identity);
        self.store.save(&session).await?;
        *self.current.write().await = Some(session.clone());
        tracing::info!(handle = %session.handle, "session started");
        Ok(session)
    }

    /// Clear the persisted session.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the session store cannot be cleared.
    pub async fn end(&self) -> Result<(), ChatError> {
        self.store.clear().await?;
        if let Some(session) = self.current.write().await.take() {
            tracing::info!(handle = %session.handle, "session ended");
        }
        Ok(())
    }

    /// The current session, if signed in.
    pub async fn current(&self) -> Option<Session> {
        self.current.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemorySessionStore;

    fn identity(handle: &str) -> Identity {
        Identity {
            handle: handle.to_string(),
            credential_secret: "secret".to_string(),
            avatar_ref: format!("{handle}.png"),
        }
    }

    #[tokio::test]
    async fn test_start_and_end() {
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()));
        assert_eq!(manager.current().await, None);

        let session = manager.start(&identity("bob")).await.unwrap();
        assert_eq!(session.handle, "bob");
        assert_eq!(session.avatar_ref, "bob.png");
        assert_eq!(manager.current().await, Some(session));

        manager.end().await.unwrap();
        assert_eq!(manager.current().await, None);
    }

    #[tokio::test]
    async fn test_restore_from_shared_store() {
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        let first = SessionManager::new(store.clone());
        let started = first.start(&identity("alice")).await.unwrap();

        // A new manager over the same store models a process restart.
        let second = SessionManager::new(store);
        assert_eq!(second.current().await, None);
        assert_eq!(second.restore().await.unwrap(), Some(started.clone()));
        assert_eq!(second.current().await, Some(started));
    }

    #[tokio::test]
    async fn test_last_start_wins() {
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()));
        manager.start(&identity("alice")).await.unwrap();
        manager.start(&identity("bob")).await.unwrap();
        assert_eq!(manager.current().await.unwrap().handle, "bob");
        assert_eq!(manager.restore().await.unwrap().unwrap().handle, "bob");
    }

    #[tokio::test]
    async fn test_end_without_session_is_ok() {
        let manager = SessionManager::new(Arc::new(MemorySessionStore::new()));
        manager.end().await.unwrap();
        assert_eq!(manager.restore().await.unwrap(), None);
    }
}
