//! Two-party messaging over a shared realtime backend.
//!
//! Provides:
//! - `IdentityStore` - Registration, credential check and rename
//! - `SessionManager` - Persisted "signed in as" state per client
//! - `MessageLog` - Append-only conversation log with live subscriptions
//! - `Messenger` - Client-facing core tying the pieces together
//! - `MemoryBackend` / `FileBackend` - Backend implementations
//! - `ChatConfig` - Environment-driven configuration

pub mod config;
pub mod identity;
pub mod log;
pub mod messenger;
pub mod session;
pub mod storage;

pub use config::{BackendKind, ChatConfig, RetryPolicy};
pub use identity::IdentityStore;
pub use log::{MessageLog, SubscriptionHandle, UpdateCallback, decode_history};
pub use messenger::{ChatEvents, ContactHit, ConversationState, Messenger, NoopEvents};
pub use session::SessionManager;
pub use storage::{MemorySessionStore, open_backend, open_session_store};

#[cfg(feature = "file")]
pub use storage::{FileBackend, FileSessionStore};
#[cfg(feature = "memory")]
pub use storage::MemoryBackend;
