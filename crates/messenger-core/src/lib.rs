//! Core abstractions for two-party realtime messaging.
//!
//! This crate provides the fundamental building blocks:
//! - `ConversationId` - Order-independent conversation key for two handles
//! - `Identity`, `Session`, `Message` - Domain records
//! - `Backend` and `SessionStore` - Storage traits
//! - `WatchRegistry` - Full-snapshot fan-out for backend watches
//! - `PushKeyGenerator` - Monotonic child keys for appended records

pub mod conversation;
pub mod error;
pub mod model;
pub mod push_key;
pub mod traits;
pub mod watch;

pub use conversation::{ConversationId, conversation_id, validate_handle};
pub use error::ChatError;
pub use model::{Identity, Message, NewMessage, Profile, STICKERS, Session};
pub use push_key::PushKeyGenerator;
pub use traits::{Backend, BackendError, Batch, Precondition, SessionStore};
pub use watch::{Watch, WatchEvent, WatchId, WatchRegistry};

/// Path of the identity record for `handle`.
#[must_use]
pub fn user_path(handle: &str) -> String {
    format!("users/{handle}")
}

/// Path of the message map for a conversation.
#[must_use]
pub fn messages_path(id: &ConversationId) -> String {
    format!("messages/{id}")
}
