//! Messaging core: authentication and the open conversation of one client.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use messenger_core::{
    Backend, ChatError, ConversationId, Identity, Message, NewMessage, Profile, STICKERS,
    Session, SessionStore, validate_handle,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{
    config::ChatConfig,
    identity::IdentityStore,
    log::{MessageLog, SubscriptionHandle},
    session::SessionManager,
};

/// Callbacks from the messaging core into the UI layer.
///
/// Implement this trait to render conversations and auth results. Calls
/// arrive from background tasks and must not block.
pub trait ChatEvents: Send + Sync {
    /// Outcome of every login, registration or authentication attempt.
    fn on_auth_result(&self, result: Result<&Session, &ChatError>);

    /// Full ordered history of the open conversation after every change.
    fn on_conversation_update(&self, partner: &str, messages: &[Message]);

    /// Profile of the partner, fetched once when a conversation opens.
    fn on_partner_profile(&self, profile: &Profile) {
        let _ = profile;
    }
}

/// Events sink that ignores everything.
#[derive(Debug, Default, Clone)]
pub struct NoopEvents;

impl ChatEvents for NoopEvents {
    fn on_auth_result(&self, _result: Result<&Session, &ChatError>) {}

    fn on_conversation_update(&self, _partner: &str, _messages: &[Message]) {}
}

/// Conversation state of a messenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    /// No conversation open.
    Closed,
    /// Subscribed, waiting for the first delivery.
    Subscribing,
    /// At least one delivery received.
    Active,
}

/// Contact search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactHit {
    pub handle: String,
    /// Whether the handle belongs to a registered identity. Unregistered
    /// handles can still be opened; the conversation waits for them.
    pub registered: bool,
    pub avatar_ref: Option<String>,
}

struct OpenConversation {
    partner: String,
    id: ConversationId,
    subscription: SubscriptionHandle,
    delivered: Arc<AtomicBool>,
}

/// One client instance of the messenger.
///
/// Holds its own session and open conversation, so several instances can
/// share a backend (one per browser tab, or per test participant).
pub struct Messenger {
    identities: IdentityStore,
    log: MessageLog,
    sessions: SessionManager,
    events: Arc<dyn ChatEvents>,
    conversation: Mutex<Option<OpenConversation>>,
}

impl Messenger {
    /// Create a messenger with default settings.
    #[must_use]
    pub fn new(
        backend: Arc<dyn Backend>,
        session_store: Arc<dyn SessionStore>,
        events: Arc<dyn ChatEvents>,
    ) -> Self {
        Self::with_config(backend, session_store, events, &ChatConfig::default())
    }

    /// Create a messenger using the retry and rename settings of `config`.
    #[must_use]
    pub fn with_config(
        backend: Arc<dyn Backend>,
        session_store: Arc<dyn SessionStore>,
        events: Arc<dyn ChatEvents>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            identities: IdentityStore::new(Arc::clone(&backend))
                .with_rename_attempts(config.rename_attempts),
            log: MessageLog::new(backend).with_retry_policy(config.retry_policy()),
            sessions: SessionManager::new(session_store),
            events,
            conversation: Mutex::new(None),
        }
    }

    /// The identity store this messenger uses.
    #[must_use]
    pub const fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// The message log this messenger uses.
    #[must_use]
    pub const fn log(&self) -> &MessageLog {
        &self.log
    }

    /// Resume the persisted session, if any.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the session store cannot be read.
    pub async fn restore(&self) -> Result<Option<Session>, ChatError> {
        self.sessions.restore().await
    }

    /// The current session.
    pub async fn session(&self) -> Option<Session> {
        self.sessions.current().await
    }

    /// Sign in as an existing identity.
    ///
    /// # Errors
    /// `InvalidArgument` for empty input, `NotFound` for an unknown handle,
    /// `WrongCredential` for a wrong secret.
    pub async fn login(&self, handle: &str, secret: &str) -> Result<Session, ChatError> {
        let result = self.try_login(handle.trim(), secret.trim()).await;
        self.report_auth(handle, result)
    }

    /// Register a new identity and sign in as it.
    ///
    /// # Errors
    /// `InvalidArgument` for empty or invalid input, `AlreadyExists` when
    /// the handle is taken. The current session is unchanged on failure.
    pub async fn register(
        &self,
        handle: &str,
        secret: &str,
        avatar_ref: &str,
    ) -> Result<Session, ChatError> {
        let result = self.try_register(handle.trim(), secret.trim(), avatar_ref).await;
        self.report_auth(handle, result)
    }

    /// Sign in, registering the handle first if it is unknown.
    ///
    /// # Errors
    /// As [`Messenger::login`] and [`Messenger::register`].
    pub async fn authenticate(
        &self,
        handle: &str,
        secret: &str,
        avatar_ref: &str,
    ) -> Result<Session, ChatError> {
        let (handle_in, secret) = (handle.trim(), secret.trim());
        let result = match self.identities.find(handle_in).await {
            Ok(Some(_)) => self.try_login(handle_in, secret).await,
            Ok(None) => self.try_register(handle_in, secret, avatar_ref).await,
            Err(e) => Err(e),
        };
        self.report_auth(handle, result)
    }

    /// Sign out, closing the open conversation.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the session store cannot be cleared.
    pub async fn logout(&self) -> Result<(), ChatError> {
        self.close().await;
        self.sessions.end().await
    }

    /// Change the signed-in handle and avatar.
    ///
    /// A new handle closes the open conversation because its id changes;
    /// an avatar-only change keeps it open. Messages already sent keep the
    /// old handle as sender.
    ///
    /// # Errors
    /// `NotSignedIn`, `InvalidArgument`, `AlreadyExists` if the new handle
    /// is taken, `NotFound` if the current identity disappeared.
    pub async fn rename_profile(
        &self,
        new_handle: &str,
        new_avatar_ref: &str,
    ) -> Result<Session, ChatError> {
        let me = self.require_session().await?;
        let identity = self
            .identities
            .rename(&me.handle, new_handle.trim(), new_avatar_ref)
            .await?;
        if identity.handle != me.handle {
            self.close().await;
        }
        self.sessions.start(&identity).await
    }

    /// Look up a contact by handle for the search box.
    ///
    /// Returns `None` for an empty query, the own handle, or a string that
    /// cannot be a handle.
    ///
    /// # Errors
    /// `NotSignedIn`, or `BackendUnavailable` if the lookup failed.
    pub async fn search_contact(&self, query: &str) -> Result<Option<ContactHit>, ChatError> {
        let me = self.require_session().await?;
        let query = query.trim();
        if query.is_empty() || query == me.handle || validate_handle(query).is_err() {
            return Ok(None);
        }
        let profile = self.identities.profile(query).await?;
        Ok(Some(ContactHit {
            handle: query.to_string(),
            registered: profile.is_some(),
            avatar_ref: profile.map(|p| p.avatar_ref),
        }))
    }

    /// Open the conversation with `partner`.
    ///
    /// Any other open conversation is unsubscribed first. Opening the
    /// conversation that is already open does nothing.
    ///
    /// # Errors
    /// `NotSignedIn`, `InvalidArgument` for an invalid partner or the own
    /// handle, `BackendUnavailable` if the subscription cannot be opened.
    pub async fn open(&self, partner: &str) -> Result<ConversationId, ChatError> {
        let me = self.require_session().await?;
        let partner = partner.trim();
        let id = ConversationId::between(&me.handle, partner)?;

        let mut current = self.conversation.lock().await;
        if current.as_ref().is_some_and(|open| open.id == id) {
            return Ok(id);
        }
        if let Some(previous) = current.take() {
            previous.subscription.unsubscribe();
            tracing::debug!(conversation = %previous.id, "closed previous conversation");
        }

        match self.identities.profile(partner).await {
            Ok(Some(profile)) => self.events.on_partner_profile(&profile),
            Ok(None) => tracing::debug!(partner, "partner is not registered yet"),
            Err(e) => tracing::warn!(partner, error = %e, "could not load partner profile"),
        }

        let delivered = Arc::new(AtomicBool::new(false));
        let subscription = {
            let events = Arc::clone(&self.events);
            let delivered = Arc::clone(&delivered);
            let partner = partner.to_string();
            self.log
                .subscribe(&id, move |messages: &[Message]| {
                    delivered.store(true, Ordering::SeqCst);
                    events.on_conversation_update(&partner, messages);
                })
                .await
                .inspect_err(|e| tracing::warn!(conversation = %id, error = %e, "subscribe failed"))?
        };

        tracing::info!(handle = %me.handle, conversation = %id, "conversation opened");
        *current = Some(OpenConversation {
            partner: partner.to_string(),
            id: id.clone(),
            subscription,
            delivered,
        });
        Ok(id)
    }

    /// Close the open conversation, if any.
    pub async fn close(&self) {
        if let Some(open) = self.conversation.lock().await.take() {
            open.subscription.unsubscribe();
            tracing::debug!(conversation = %open.id, "conversation closed");
        }
    }

    /// Send a message to the open conversation.
    ///
    /// Resolves with the committed message once the backend acknowledged
    /// it; a UI clears its input on `Ok` and keeps it on `Err` so nothing
    /// is silently dropped. Plain text is trimmed.
    ///
    /// # Errors
    /// `NotSignedIn`, `NoConversation`, `InvalidArgument` for an empty
    /// body, `BackendUnavailable` (retryable) if the append failed.
    pub async fn send(&self, body: &str, is_rich: bool) -> Result<Message, ChatError> {
        let me = self.require_session().await?;
        let id = self
            .conversation
            .lock()
            .await
            .as_ref()
            .map(|open| open.id.clone())
            .ok_or(ChatError::NoConversation)?;

        let draft = if is_rich {
            NewMessage::sticker(me.handle, body)
        } else {
            NewMessage::text(me.handle, body.trim())
        };
        self.log
            .append(&id, draft)
            .await
            .inspect_err(|e| tracing::warn!(conversation = %id, error = %e, "send failed"))
    }

    /// Send one of the [`STICKERS`].
    ///
    /// # Errors
    /// `InvalidArgument` if `sticker` is not in the palette, otherwise as
    /// [`Messenger::send`].
    pub async fn send_sticker(&self, sticker: &str) -> Result<Message, ChatError> {
        if !STICKERS.contains(&sticker) {
            return Err(ChatError::invalid(format!("{sticker:?} is not a sticker")));
        }
        self.send(sticker, true).await
    }

    /// Current conversation state.
    pub async fn state(&self) -> ConversationState {
        match self.conversation.lock().await.as_ref() {
            None => ConversationState::Closed,
            Some(open) if open.delivered.load(Ordering::SeqCst) => ConversationState::Active,
            Some(_) => ConversationState::Subscribing,
        }
    }

    /// Partner of the open conversation.
    pub async fn partner(&self) -> Option<String> {
        self.conversation
            .lock()
            .await
            .as_ref()
            .map(|open| open.partner.clone())
    }

    async fn require_session(&self) -> Result<Session, ChatError> {
        self.sessions.current().await.ok_or(ChatError::NotSignedIn)
    }

    async fn try_login(&self, handle: &str, secret: &str) -> Result<Session, ChatError> {
        require_credentials(handle, secret)?;
        let identity = self.identities.check_credentials(handle, secret).await?;
        self.begin_session(&identity).await
    }

    async fn try_register(
        &self,
        handle: &str,
        secret: &str,
        avatar_ref: &str,
    ) -> Result<Session, ChatError> {
        require_credentials(handle, secret)?;
        let identity = self.identities.register(handle, secret, avatar_ref).await?;
        self.begin_session(&identity).await
    }

    async fn begin_session(&self, identity: &Identity) -> Result<Session, ChatError> {
        let switching = self
            .sessions
            .current()
            .await
            .is_some_and(|s| s.handle != identity.handle);
        if switching {
            self.close().await;
        }
        self.sessions.start(identity).await
    }

    fn report_auth(
        &self,
        handle: &str,
        result: Result<Session, ChatError>,
    ) -> Result<Session, ChatError> {
        if let Err(ref e) = result {
            tracing::warn!(handle = handle.trim(), error = %e, "authentication failed");
        }
        self.events.on_auth_result(result.as_ref());
        result
    }
}

fn require_credentials(handle: &str, secret: &str) -> Result<(), ChatError> {
    if handle.is_empty() || secret.is_empty() {
        return Err(ChatError::invalid("handle and secret are required"));
    }
    Ok(())
}
