//! Domain records shared by the stores, the messaging core and transports.

use std::fmt;

use chrono::{DateTime, Local, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::ConversationId;

/// Sticker palette offered by the picker. Stickers are sent as rich content.
pub const STICKERS: [&str; 10] = ["🔥", "😂", "❤️", "👍", "🚀", "💀", "🤡", "🍕", "🌈", "💎"];

/// A registered user.
///
/// The secret is kept and compared in plaintext; there is no hashing scheme.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Unique, case-sensitive handle. Primary key.
    pub handle: String,
    /// Login secret.
    pub credential_secret: String,
    /// Opaque avatar reference (URI or data URL).
    pub avatar_ref: String,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("handle", &self.handle)
            .field("credential_secret", &"<redacted>")
            .field("avatar_ref", &self.avatar_ref)
            .finish()
    }
}

impl Identity {
    /// Public part of the identity.
    #[must_use]
    pub fn profile(&self) -> Profile {
        Profile {
            handle: self.handle.clone(),
            avatar_ref: self.avatar_ref.clone(),
        }
    }
}

/// Secret-free view of an identity, shown for conversation partners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub handle: String,
    pub avatar_ref: String,
}

/// The signed-in identity of one client instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub handle: String,
    pub avatar_ref: String,
    /// When the session was started.
    pub started_at: DateTime<Utc>,
}

impl Session {
    /// Start a session for `identity` now.
    #[must_use]
    pub fn for_identity(identity: &Identity) -> Self {
        Self {
            handle: identity.handle.clone(),
            avatar_ref: identity.avatar_ref.clone(),
            started_at: Utc::now(),
        }
    }
}

/// A message about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub sender: String,
    pub body: String,
    pub is_rich: bool,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    /// Plain text message stamped with the current time.
    pub fn text(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
            is_rich: false,
            sent_at: Utc::now().trunc_subsecs(3),
        }
    }

    /// Sticker (rich content) message stamped with the current time.
    pub fn sticker(sender: impl Into<String>, sticker: impl Into<String>) -> Self {
        Self {
            is_rich: true,
            ..Self::text(sender, sticker)
        }
    }
}

/// A committed message.
///
/// Immutable once created. `sender` is the handle at send time and is not
/// rewritten when the sender later renames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub conversation_id: ConversationId,
    pub sender: String,
    pub body: String,
    pub is_rich: bool,
    pub sent_at: DateTime<Utc>,
    /// Backend-assigned ordering token, unique within the conversation.
    pub sequence: String,
}

impl Message {
    /// Assemble a committed message from its draft and the assigned key.
    #[must_use]
    pub fn committed(conversation_id: ConversationId, draft: NewMessage, sequence: String) -> Self {
        Self {
            conversation_id,
            sender: draft.sender,
            body: draft.body,
            is_rich: draft.is_rich,
            sent_at: draft.sent_at,
            sequence,
        }
    }

    /// Sort key for delivery order.
    #[must_use]
    pub fn order_key(&self) -> (DateTime<Utc>, &str) {
        (self.sent_at, &self.sequence)
    }

    /// Whether `handle` sent this message.
    #[must_use]
    pub fn is_from(&self, handle: &str) -> bool {
        self.sender == handle
    }

    /// `HH:MM` in local time, as shown under a message bubble.
    #[must_use]
    pub fn display_time(&self) -> String {
        self.sent_at.with_timezone(&Local).format("%H:%M").to_string()
    }
}
