//! Storage implementations.

use std::sync::Arc;

use messenger_core::{Backend, BackendError, SessionStore};

use crate::config::{BackendKind, ChatConfig};

#[cfg(feature = "file")]
pub mod file;

#[cfg(feature = "memory")]
pub mod memory;

pub mod session_store;
mod tree;

#[cfg(feature = "file")]
pub use file::FileBackend;
#[cfg(feature = "memory")]
pub use memory::MemoryBackend;
#[cfg(feature = "file")]
pub use session_store::FileSessionStore;
pub use session_store::MemorySessionStore;

/// Open the backend selected by `config`.
///
/// # Errors
/// Returns error if the selected backend cannot be opened or was compiled
/// out.
pub async fn open_backend(config: &ChatConfig) -> Result<Arc<dyn Backend>, BackendError> {
    match config.backend {
        #[cfg(feature = "memory")]
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        #[cfg(feature = "file")]
        BackendKind::File => Ok(Arc::new(FileBackend::open(config.database_path()).await?)),
        #[allow(unreachable_patterns)]
        other => Err(BackendError::Internal(format!(
            "backend {other} is not compiled in"
        ))),
    }
}

/// Open the session store matching `config`.
///
/// The memory backend keeps the session in memory too; the file backend
/// persists it next to the database.
#[must_use]
pub fn open_session_store(config: &ChatConfig) -> Arc<dyn SessionStore> {
    match config.backend {
        #[cfg(feature = "file")]
        BackendKind::File => Arc::new(FileSessionStore::new(config.session_path())),
        _ => Arc::new(MemorySessionStore::new()),
    }
}
