//! Wire protocol for client-server communication.

use messenger_chat::ContactHit;
use messenger_core::{ChatError, ConversationId, Message, Profile, Session};
use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sign in as an existing identity.
    Login { handle: String, secret: String },
    /// Register a new identity.
    Register {
        handle: String,
        secret: String,
        #[serde(default)]
        avatar_ref: String,
    },
    /// Sign in, registering first if the handle is unknown.
    Authenticate {
        handle: String,
        secret: String,
        #[serde(default)]
        avatar_ref: String,
    },
    /// Sign out.
    Logout,
    /// Change the signed-in handle and avatar.
    RenameProfile { handle: String, avatar_ref: String },
    /// Contact search.
    Search { query: String },
    /// Open the conversation with `partner`.
    Open { partner: String },
    /// Send plain text to the open conversation.
    Send { body: String },
    /// Send a sticker to the open conversation.
    Sticker { sticker: String },
    /// Ping for keepalive.
    Ping,
}

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    WrongCredential,
    AlreadyExists,
    BackendUnavailable,
    NotSignedIn,
    NoConversation,
    Corrupt,
    /// The frame could not be parsed as a command.
    BadRequest,
}

impl From<&ChatError> for ErrorKind {
    fn from(err: &ChatError) -> Self {
        match err {
            ChatError::InvalidArgument(_) => Self::InvalidArgument,
            ChatError::NotFound(_) => Self::NotFound,
            ChatError::WrongCredential(_) => Self::WrongCredential,
            ChatError::AlreadyExists(_) => Self::AlreadyExists,
            ChatError::BackendUnavailable(_) => Self::BackendUnavailable,
            ChatError::NotSignedIn => Self::NotSignedIn,
            ChatError::NoConversation => Self::NoConversation,
            ChatError::Corrupt(_) => Self::Corrupt,
        }
    }
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Signed in (login, register, authenticate or rename).
    AuthOk { session: Session },
    /// Sign-in attempt failed.
    AuthFailed { kind: ErrorKind, message: String },
    /// Signed out.
    LoggedOut,
    /// Conversation subscribed.
    ConversationOpened {
        partner: String,
        conversation_id: ConversationId,
    },
    /// Partner profile for the conversation header.
    PartnerProfile { profile: Profile },
    /// Full ordered history after a change.
    ConversationUpdate {
        partner: String,
        messages: Vec<Message>,
    },
    /// Message committed; the client may clear its input.
    Sent { message: Message },
    /// Contact search result.
    SearchResult {
        query: String,
        hit: Option<ContactHit>,
    },
    /// Command failed.
    Error { kind: ErrorKind, message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Error reply for a failed command.
    #[must_use]
    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            kind: err.into(),
            message: err.to_string(),
        }
    }

    /// Reply for an auth attempt that failed.
    #[must_use]
    pub fn auth_failed(err: &ChatError) -> Self {
        Self::AuthFailed {
            kind: err.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_commands() {
        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "login", "handle": "bob", "secret": "pw"}))
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Login {
                handle: "bob".into(),
                secret: "pw".into()
            }
        );

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "register", "handle": "bob", "secret": "pw"}))
                .unwrap();
        assert!(matches!(msg, ClientMessage::Register { avatar_ref, .. } if avatar_ref.is_empty()));

        let msg: ClientMessage =
            serde_json::from_value(json!({"type": "rename_profile", "handle": "b", "avatar_ref": "x"}))
                .unwrap();
        assert!(matches!(msg, ClientMessage::RenameProfile { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
    }

    #[test]
    fn test_reject_unknown_command() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"call","partner":"bob"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"send"}"#).is_err());
    }

    #[test]
    fn test_error_kinds() {
        let msg = ServerMessage::error(&ChatError::NoConversation);
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "type": "error",
                "kind": "no_conversation",
                "message": ChatError::NoConversation.to_string(),
            })
        );

        let failed = ServerMessage::auth_failed(&ChatError::WrongCredential("bob".into()));
        let value = serde_json::to_value(&failed).unwrap();
        assert_eq!(value["type"], "auth_failed");
        assert_eq!(value["kind"], "wrong_credential");

        assert_eq!(
            ErrorKind::from(&ChatError::BackendUnavailable("down".into())),
            ErrorKind::BackendUnavailable
        );
    }

    #[test]
    fn test_conversation_opened_shape() {
        let msg = ServerMessage::ConversationOpened {
            partner: "bob".into(),
            conversation_id: messenger_core::conversation_id("bob", "alice").unwrap(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "conversation_opened");
        assert_eq!(value["conversation_id"], "alice_vs_bob");
    }
}
