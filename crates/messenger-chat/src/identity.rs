//! Identity store: handle → credential and profile records.

use std::sync::Arc;

use messenger_core::{
    Backend, BackendError, Batch, ChatError, Identity, Precondition, Profile, user_path,
    validate_handle,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stored form of an identity under `users/{handle}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    password: String,
    #[serde(default)]
    avatar: String,
}

impl IdentityRecord {
    fn of(identity: &Identity) -> Self {
        Self {
            password: identity.credential_secret.clone(),
            avatar: identity.avatar_ref.clone(),
        }
    }

    fn into_identity(self, handle: &str) -> Identity {
        Identity {
            handle: handle.to_string(),
            credential_secret: self.password,
            avatar_ref: self.avatar,
        }
    }

    fn to_value(&self) -> Result<Value, ChatError> {
        serde_json::to_value(self).map_err(|e| ChatError::Corrupt(e.to_string()))
    }
}

/// Registered identities, read from and written to the backend on every
/// call. Nothing about handle availability is cached.
pub struct IdentityStore {
    backend: Arc<dyn Backend>,
    rename_attempts: u32,
}

impl IdentityStore {
    /// Create a store over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            rename_attempts: 3,
        }
    }

    /// Set how often `rename` retries after the old record changed underneath it.
    #[must_use]
    pub fn with_rename_attempts(mut self, attempts: u32) -> Self {
        self.rename_attempts = attempts.max(1);
        self
    }

    /// Look up `handle`, returning `None` when unregistered.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` or `Corrupt` on backend failure.
    pub async fn find(&self, handle: &str) -> Result<Option<Identity>, ChatError> {
        validate_handle(handle)?;
        Ok(self.read_record(handle).await?.map(|(record, _)| record.into_identity(handle)))
    }

    /// Look up `handle`.
    ///
    /// # Errors
    /// Returns `NotFound` when the handle is not registered.
    pub async fn lookup(&self, handle: &str) -> Result<Identity, ChatError> {
        self.find(handle)
            .await?
            .ok_or_else(|| ChatError::NotFound(handle.to_string()))
    }

    /// Public profile of `handle`, if registered.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` or `Corrupt` on backend failure.
    pub async fn profile(&self, handle: &str) -> Result<Option<Profile>, ChatError> {
        Ok(self.find(handle).await?.map(|identity| identity.profile()))
    }

    /// Register a new identity.
    ///
    /// The existence check and the insert are one backend commit, so two
    /// clients racing for the same handle cannot both succeed.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an invalid handle or empty secret and
    /// `AlreadyExists` when the handle is taken.
    pub async fn register(
        &self,
        handle: &str,
        credential_secret: &str,
        avatar_ref: &str,
    ) -> Result<Identity, ChatError> {
        validate_handle(handle)?;
        if credential_secret.is_empty() {
            return Err(ChatError::invalid("secret is empty"));
        }

        let identity = Identity {
            handle: handle.to_string(),
            credential_secret: credential_secret.to_string(),
            avatar_ref: avatar_ref.to_string(),
        };
        let path = user_path(handle);
        let batch = Batch::new()
            .require_absent(&path)
            .set(&path, IdentityRecord::of(&identity).to_value()?);

        match self.backend.commit(batch).await {
            Ok(()) => {
                tracing::info!(handle, "registered identity");
                Ok(identity)
            }
            Err(BackendError::Conflict(_)) => Err(ChatError::AlreadyExists(handle.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Compare `supplied_secret` with the stored secret.
    ///
    /// # Errors
    /// Returns `NotFound` when the handle is not registered.
    pub async fn verify(&self, handle: &str, supplied_secret: &str) -> Result<bool, ChatError> {
        match self.check_credentials(handle, supplied_secret).await {
            Ok(_) => Ok(true),
            Err(ChatError::WrongCredential(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// The identity of `handle` if `supplied_secret` matches.
    ///
    /// # Errors
    /// Returns `NotFound` when the handle is not registered and
    /// `WrongCredential` when the secret differs.
    pub async fn check_credentials(
        &self,
        handle: &str,
        supplied_secret: &str,
    ) -> Result<Identity, ChatError> {
        let identity = self.lookup(handle).await?;
        if identity.credential_secret != supplied_secret {
            return Err(ChatError::WrongCredential(handle.to_string()));
        }
        Ok(identity)
    }

    /// Move `old_handle` to `new_handle` with a new avatar.
    ///
    /// Removal of the old record and insertion of the new one are one
    /// commit. Past messages keep the old handle as their sender.
    ///
    /// # Errors
    /// Returns `NotFound` if `old_handle` is not registered and
    /// `AlreadyExists` if `new_handle` is taken.
    pub async fn rename(
        &self,
        old_handle: &str,
        new_handle: &str,
        new_avatar_ref: &str,
    ) -> Result<Identity, ChatError> {
        validate_handle(old_handle)?;
        validate_handle(new_handle)?;

        let old_path = user_path(old_handle);
        let new_path = user_path(new_handle);

        for attempt in 1..=self.rename_attempts {
            let (record, raw) = self
                .read_record(old_handle)
                .await?
                .ok_or_else(|| ChatError::NotFound(old_handle.to_string()))?;

            let renamed = IdentityRecord {
                avatar: new_avatar_ref.to_string(),
                ..record
            };
            let mut batch = Batch::new().require_equals(&old_path, raw);
            if old_handle != new_handle {
                batch = batch.require_absent(&new_path).remove(&old_path);
            }
            let batch = batch.set(&new_path, renamed.to_value()?);

            match self.backend.commit(batch).await {
                Ok(()) => {
                    tracing::info!(old = old_handle, new = new_handle, "renamed identity");
                    return Ok(renamed.into_identity(new_handle));
                }
                Err(BackendError::Conflict(Precondition::Absent(taken))) if taken == new_path => {
                    return Err(ChatError::AlreadyExists(new_handle.to_string()));
                }
                Err(BackendError::Conflict(_)) => {
                    tracing::debug!(handle = old_handle, attempt, "record changed during rename, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ChatError::BackendUnavailable(format!(
            "{old_handle} kept changing during rename"
        )))
    }

    async fn read_record(
        &self,
        handle: &str,
    ) -> Result<Option<(IdentityRecord, Value)>, ChatError> {
        let Some(raw) = self.backend.read_once(&user_path(handle)).await? else {
            return Ok(None);
        };
        let record = serde_json::from_value(raw.clone())
            .map_err(|e| ChatError::Corrupt(format!("users/{handle}: {e}")))?;
        Ok(Some((record, raw)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use serde_json::json;

    use super::*;
    use crate::storage::MemoryBackend;

    fn store() -> (Arc<MemoryBackend>, IdentityStore) {
        let backend = Arc::new(MemoryBackend::new());
        (backend.clone(), IdentityStore::new(backend))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let (_, store) = store();
        let alice = store.register("alice", "p1", "avatar-a").await.unwrap();
        assert_eq!(alice.handle, "alice");

        let found = store.lookup("alice").await.unwrap();
        assert_eq!(found, alice);
        assert_eq!(
            store.profile("alice").await.unwrap(),
            Some(Profile {
                handle: "alice".into(),
                avatar_ref: "avatar-a".into()
            })
        );
    }

    #[tokio::test]
    async fn test_register_taken_handle() {
        let (_, store) = store();
        store.register("alice", "p1", "a").await.unwrap();
        let err = store.register("alice", "p2", "b").await.unwrap_err();
        assert_eq!(err, ChatError::AlreadyExists("alice".into()));
        assert!(store.verify("alice", "p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_register_single_winner() {
        let (backend, _) = store();
        let mut tasks = Vec::new();
        for i in 0..8 {
            let store = IdentityStore::new(backend.clone());
            tasks.push(tokio::spawn(async move {
                store.register("alice", &format!("p{i}"), "").await
            }));
        }
        let mut winners = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e, ChatError::AlreadyExists("alice".into())),
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let (backend, store) = store();
        assert!(matches!(store.register("", "p", "a").await, Err(ChatError::InvalidArgument(_))));
        assert!(matches!(store.register("bob", "", "a").await, Err(ChatError::InvalidArgument(_))));
        assert!(matches!(store.register("a/b", "p", "a").await, Err(ChatError::InvalidArgument(_))));
        assert_eq!(backend.snapshot().unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_verify() {
        let (_, store) = store();
        store.register("bob", "right", "b").await.unwrap();
        assert!(store.verify("bob", "right").await.unwrap());
        assert!(!store.verify("bob", "wrong").await.unwrap());
        assert_eq!(
            store.verify("carol", "x").await.unwrap_err(),
            ChatError::NotFound("carol".into())
        );
    }

    #[tokio::test]
    async fn test_check_credentials_returns_identity() {
        let (_, store) = store();
        store.register("bob", "right", "b").await.unwrap();
        let bob = store.check_credentials("bob", "right").await.unwrap();
        assert_eq!(bob.avatar_ref, "b");
        assert_eq!(
            store.check_credentials("bob", "wrong").await.unwrap_err(),
            ChatError::WrongCredential("bob".into())
        );
    }

    #[tokio::test]
    async fn test_reads_legacy_record() {
        let (backend, store) = store();
        backend
            .write("users/dave", json!({"password": "pw", "avatar": "https://img/d.png"}))
            .await
            .unwrap();
        let dave = store.lookup("dave").await.unwrap();
        assert_eq!(dave.credential_secret, "pw");
        assert_eq!(dave.avatar_ref, "https://img/d.png");
    }

    #[tokio::test]
    async fn test_corrupt_record() {
        let (backend, store) = store();
        backend.write("users/eve", json!({"avatar": 5})).await.unwrap();
        assert!(matches!(store.lookup("eve").await, Err(ChatError::Corrupt(_))));
    }

    #[tokio::test]
    async fn test_rename_moves_record() {
        let (backend, store) = store();
        store.register("alice", "p1", "a").await.unwrap();

        let renamed = store.rename("alice", "alicia", "a2").await.unwrap();
        assert_eq!(renamed.handle, "alicia");
        assert_eq!(renamed.credential_secret, "p1");
        assert_eq!(renamed.avatar_ref, "a2");

        assert!(store.find("alice").await.unwrap().is_none());
        assert_eq!(
            backend.snapshot().unwrap(),
            json!({"users": {"alicia": {"password": "p1", "avatar": "a2"}}})
        );
    }

    #[tokio::test]
    async fn test_rename_is_one_visible_step() {
        let (backend, store) = store();
        store.register("alice", "p1", "a").await.unwrap();
        let mut watch = backend.watch("users").await.unwrap();
        assert!(watch.next().await.unwrap().unwrap().is_some());

        store.rename("alice", "alicia", "a").await.unwrap();

        let users = watch.next().await.unwrap().unwrap().unwrap();
        assert_eq!(users.as_object().unwrap().len(), 1);
        assert!(users.get("alicia").is_some());
    }

    #[tokio::test]
    async fn test_rename_same_handle_changes_avatar() {
        let (_, store) = store();
        store.register("alice", "p1", "a").await.unwrap();
        let updated = store.rename("alice", "alice", "b").await.unwrap();
        assert_eq!(updated.avatar_ref, "b");
        assert_eq!(store.lookup("alice").await.unwrap().avatar_ref, "b");
    }

    /// Backend that rewrites `users/alice` right before the first commit,
    /// as a second client editing the same profile would.
    struct InterferingBackend {
        inner: MemoryBackend,
        interfered: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Backend for InterferingBackend {
        async fn write(&self, path: &str, value: Value) -> Result<(), BackendError> {
            self.inner.write(path, value).await
        }

        async fn read_once(&self, path: &str) -> Result<Option<Value>, BackendError> {
            self.inner.read_once(path).await
        }

        async fn append_child(&self, path: &str, value: Value) -> Result<String, BackendError> {
            self.inner.append_child(path, value).await
        }

        async fn commit(&self, batch: Batch) -> Result<(), BackendError> {
            if !self.interfered.swap(true, Ordering::SeqCst) {
                self.inner
                    .write("users/alice", json!({"password": "p1", "avatar": "other"}))
                    .await?;
            }
            self.inner.commit(batch).await
        }

        async fn watch(&self, path: &str) -> Result<messenger_core::Watch, BackendError> {
            self.inner.watch(path).await
        }

        fn unwatch(&self, id: messenger_core::WatchId) {
            self.inner.unwatch(id);
        }
    }

    fn interfering() -> (Arc<InterferingBackend>, IdentityStore) {
        let backend = Arc::new(InterferingBackend {
            inner: MemoryBackend::with_contents(
                json!({"users": {"alice": {"password": "p1", "avatar": "a"}}}),
            ),
            interfered: AtomicBool::new(false),
        });
        (backend.clone(), IdentityStore::new(backend))
    }

    #[tokio::test]
    async fn test_rename_same_handle_retries_after_concurrent_edit() {
        let (backend, store) = interfering();
        let updated = store.rename("alice", "alice", "b").await.unwrap();
        assert_eq!(updated.avatar_ref, "b");
        assert!(backend.interfered.load(Ordering::SeqCst));
        assert_eq!(store.lookup("alice").await.unwrap().avatar_ref, "b");
    }

    #[tokio::test]
    async fn test_rename_new_handle_retries_after_concurrent_edit() {
        let (_, store) = interfering();
        let renamed = store.rename("alice", "alicia", "b").await.unwrap();
        assert_eq!(renamed.handle, "alicia");
        assert!(store.find("alice").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rename_errors() {
        let (_, store) = store();
        store.register("alice", "p1", "a").await.unwrap();
        store.register("bob", "p2", "b").await.unwrap();

        assert_eq!(
            store.rename("alice", "bob", "x").await.unwrap_err(),
            ChatError::AlreadyExists("bob".into())
        );
        assert_eq!(
            store.rename("carol", "dave", "x").await.unwrap_err(),
            ChatError::NotFound("carol".into())
        );
        assert_eq!(store.lookup("alice").await.unwrap().avatar_ref, "a");
    }

    #[tokio::test]
    async fn test_backend_outage_is_transient() {
        let (backend, store) = store();
        backend.set_available(false);
        let err = store.register("alice", "p1", "a").await.unwrap_err();
        assert!(err.is_transient());
    }
}
