//! Bridge between protocol commands and a [`Messenger`].

use messenger_chat::{ChatEvents, Messenger};
use messenger_core::{ChatError, Message, Profile, Session};
use tokio::sync::mpsc;

use crate::protocol::{ClientMessage, ServerMessage};

/// Forwards messenger callbacks into a server message channel.
pub struct ChannelEvents {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ChannelEvents {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { tx }
    }

    fn forward(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            tracing::debug!("client channel closed, dropping event");
        }
    }
}

impl ChatEvents for ChannelEvents {
    fn on_auth_result(&self, result: Result<&Session, &ChatError>) {
        self.forward(match result {
            Ok(session) => ServerMessage::AuthOk {
                session: session.clone(),
            },
            Err(e) => ServerMessage::auth_failed(e),
        });
    }

    fn on_conversation_update(&self, partner: &str, messages: &[Message]) {
        self.forward(ServerMessage::ConversationUpdate {
            partner: partner.to_string(),
            messages: messages.to_vec(),
        });
    }

    fn on_partner_profile(&self, profile: &Profile) {
        self.forward(ServerMessage::PartnerProfile {
            profile: profile.clone(),
        });
    }
}

/// Run one client command against `messenger`.
///
/// Returns the direct reply, if any. Auth commands reply through
/// [`ChatEvents::on_auth_result`] instead, so they return `None`.
pub async fn handle_command(messenger: &Messenger, msg: ClientMessage) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Login { handle, secret } => {
            let _ = messenger.login(&handle, &secret).await;
            None
        }
        ClientMessage::Register {
            handle,
            secret,
            avatar_ref,
        } => {
            let _ = messenger.register(&handle, &secret, &avatar_ref).await;
            None
        }
        ClientMessage::Authenticate {
            handle,
            secret,
            avatar_ref,
        } => {
            let _ = messenger.authenticate(&handle, &secret, &avatar_ref).await;
            None
        }
        ClientMessage::Logout => Some(reply(messenger.logout().await, |()| {
            ServerMessage::LoggedOut
        })),
        ClientMessage::RenameProfile { handle, avatar_ref } => Some(reply(
            messenger.rename_profile(&handle, &avatar_ref).await,
            |session| ServerMessage::AuthOk { session },
        )),
        ClientMessage::Search { query } => Some(reply(
            messenger.search_contact(&query).await,
            |hit| ServerMessage::SearchResult {
                query: query.trim().to_string(),
                hit,
            },
        )),
        ClientMessage::Open { partner } => Some(reply(
            messenger.open(&partner).await,
            |conversation_id| ServerMessage::ConversationOpened {
                partner: partner.trim().to_string(),
                conversation_id,
            },
        )),
        ClientMessage::Send { body } => Some(reply(
            messenger.send(&body, false).await,
            |message| ServerMessage::Sent { message },
        )),
        ClientMessage::Sticker { sticker } => Some(reply(
            messenger.send_sticker(&sticker).await,
            |message| ServerMessage::Sent { message },
        )),
        ClientMessage::Ping => Some(ServerMessage::Pong),
    }
}

fn reply<T>(
    result: Result<T, ChatError>,
    ok: impl FnOnce(T) -> ServerMessage,
) -> ServerMessage {
    result.map_or_else(|e| ServerMessage::error(&e), ok)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use messenger_chat::{MemoryBackend, MemorySessionStore};
    use tokio::time::timeout;

    use super::*;
    use crate::protocol::ErrorKind;

    struct Client {
        messenger: Messenger,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Client {
        fn new(backend: &Arc<MemoryBackend>) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let messenger = Messenger::new(
                backend.clone(),
                Arc::new(MemorySessionStore::new()),
                Arc::new(ChannelEvents::new(tx)),
            );
            Self { messenger, rx }
        }

        async fn run(&self, msg: ClientMessage) -> Option<ServerMessage> {
            handle_command(&self.messenger, msg).await
        }

        async fn event(&mut self) -> ServerMessage {
            timeout(Duration::from_secs(2), self.rx.recv())
                .await
                .expect("timed out waiting for event")
                .expect("channel closed")
        }
    }

    fn register(handle: &str) -> ClientMessage {
        ClientMessage::Register {
            handle: handle.into(),
            secret: "pw".into(),
            avatar_ref: format!("{handle}.png"),
        }
    }

    #[tokio::test]
    async fn test_auth_replies_through_events() {
        let backend = Arc::new(MemoryBackend::new());
        let mut client = Client::new(&backend);

        assert_eq!(client.run(register("alice")).await, None);
        match client.event().await {
            ServerMessage::AuthOk { session } => assert_eq!(session.handle, "alice"),
            other => panic!("unexpected {other:?}"),
        }

        let login = ClientMessage::Login {
            handle: "alice".into(),
            secret: "nope".into(),
        };
        assert_eq!(client.run(login).await, None);
        match client.event().await {
            ServerMessage::AuthFailed { kind, .. } => assert_eq!(kind, ErrorKind::WrongCredential),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_commands_require_session() {
        let backend = Arc::new(MemoryBackend::new());
        let client = Client::new(&backend);

        let reply = client
            .run(ClientMessage::Send { body: "hi".into() })
            .await
            .unwrap();
        assert!(matches!(reply, ServerMessage::Error { kind: ErrorKind::NotSignedIn, .. }));
        assert_eq!(client.run(ClientMessage::Ping).await, Some(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn test_conversation_flow() {
        let backend = Arc::new(MemoryBackend::new());
        let mut alice = Client::new(&backend);
        let mut bob = Client::new(&backend);
        alice.run(register("alice")).await;
        bob.run(register("bob")).await;
        alice.event().await;
        bob.event().await;

        let reply = alice
            .run(ClientMessage::Open {
                partner: " bob ".into(),
            })
            .await
            .unwrap();
        match reply {
            ServerMessage::ConversationOpened {
                partner,
                conversation_id,
            } => {
                assert_eq!(partner, "bob");
                assert_eq!(conversation_id.as_str(), "alice_vs_bob");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(alice.event().await, ServerMessage::PartnerProfile { profile } if profile.handle == "bob"));
        assert!(matches!(alice.event().await, ServerMessage::ConversationUpdate { messages, .. } if messages.is_empty()));

        let sent = alice
            .run(ClientMessage::Sticker {
                sticker: "🍕".into(),
            })
            .await
            .unwrap();
        assert!(matches!(sent, ServerMessage::Sent { ref message } if message.is_rich));

        match alice.event().await {
            ServerMessage::ConversationUpdate { partner, messages } => {
                assert_eq!(partner, "bob");
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].body, "🍕");
            }
            other => panic!("unexpected {other:?}"),
        }

        let search = bob
            .run(ClientMessage::Search {
                query: "alice".into(),
            })
            .await
            .unwrap();
        assert!(matches!(search, ServerMessage::SearchResult { hit: Some(ref hit), .. } if hit.registered));

        let reply = bob.run(ClientMessage::Logout).await.unwrap();
        assert_eq!(reply, ServerMessage::LoggedOut);
    }

    #[tokio::test]
    async fn test_rename_reports_session() {
        let backend = Arc::new(MemoryBackend::new());
        let mut client = Client::new(&backend);
        client.run(register("alice")).await;
        client.event().await;

        let reply = client
            .run(ClientMessage::RenameProfile {
                handle: "alicia".into(),
                avatar_ref: "new.png".into(),
            })
            .await
            .unwrap();
        assert!(matches!(reply, ServerMessage::AuthOk { ref session } if session.handle == "alicia"));
    }
}
