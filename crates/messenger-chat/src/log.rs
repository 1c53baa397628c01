//! Message log: per-conversation ordered history with live subscriptions.

use std::{cell::RefCell, sync::Arc};

use chrono::{DateTime, NaiveTime, Utc};
use futures::StreamExt;
use messenger_core::{
    Backend, ChatError, ConversationId, Message, NewMessage, Watch, WatchId, messages_path,
};
use parking_lot::ReentrantMutex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use serde_json::Value;
use uuid::Uuid;

use crate::config::RetryPolicy;

/// Callback receiving the full ordered history of a conversation.
pub type UpdateCallback = Box<dyn FnMut(&[Message]) + Send + 'static>;

/// Stored form of a message under `messages/{conversation}/{key}`.
///
/// Also reads the older `{sender, text, isSticker, time}` layout, whose
/// `time` is only a local `HH:MM` label. Such records get the epoch as
/// `sent_at` and so sort before every dated message, in key order.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageRecord {
    sender: String,
    #[serde(alias = "text")]
    body: String,
    #[serde(default, alias = "isSticker")]
    is_rich_content: bool,
    #[serde(default, alias = "time", deserialize_with = "sent_at_or_epoch")]
    sent_at: DateTime<Utc>,
}

fn sent_at_or_epoch<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(at.with_timezone(&Utc));
    }
    if NaiveTime::parse_from_str(raw.trim(), "%H:%M").is_ok() {
        return Ok(DateTime::<Utc>::default());
    }
    Err(D::Error::custom(format!("unrecognised timestamp {raw:?}")))
}

impl MessageRecord {
    fn of(draft: &NewMessage) -> Self {
        Self {
            sender: draft.sender.clone(),
            body: draft.body.clone(),
            is_rich_content: draft.is_rich,
            sent_at: draft.sent_at,
        }
    }

    fn into_message(self, conversation_id: ConversationId, sequence: String) -> Message {
        Message {
            conversation_id,
            sender: self.sender,
            body: self.body,
            is_rich: self.is_rich_content,
            sent_at: self.sent_at,
            sequence,
        }
    }
}

/// Decode a conversation subtree into messages ordered by
/// `(sent_at, sequence)`. Malformed entries are logged and skipped.
#[must_use]
pub fn decode_history(id: &ConversationId, value: Option<Value>) -> Vec<Message> {
    let entries = match value {
        None => return Vec::new(),
        Some(Value::Object(entries)) => entries,
        Some(other) => {
            tracing::warn!(conversation = %id, value = %other, "conversation is not a map, ignoring");
            return Vec::new();
        }
    };

    let mut messages: Vec<Message> = entries
        .into_iter()
        .filter_map(|(key, raw)| match serde_json::from_value::<MessageRecord>(raw) {
            Ok(record) => Some(record.into_message(id.clone(), key)),
            Err(e) => {
                tracing::warn!(conversation = %id, %key, error = %e, "skipping malformed message");
                None
            }
        })
        .collect();
    messages.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
    messages
}

struct Slot {
    callback: Option<UpdateCallback>,
    cancelled: bool,
    watch_id: Option<WatchId>,
}

/// Delivery state shared by a subscription's pump task and its handle.
///
/// The lock is re-entrant so the callback itself may unsubscribe. An
/// unsubscribe from any other task waits for an in-flight delivery, so no
/// delivery starts after `unsubscribe` returns.
struct Delivery {
    slot: ReentrantMutex<RefCell<Slot>>,
}

impl Delivery {
    fn new(callback: UpdateCallback, watch_id: WatchId) -> Self {
        Self {
            slot: ReentrantMutex::new(RefCell::new(Slot {
                callback: Some(callback),
                cancelled: false,
                watch_id: Some(watch_id),
            })),
        }
    }

    /// Run the callback. Returns `false` once cancelled.
    fn deliver(&self, messages: &[Message]) -> bool {
        let guard = self.slot.lock();
        let taken = {
            let mut slot = guard.borrow_mut();
            if slot.cancelled {
                return false;
            }
            slot.callback.take()
        };
        let Some(mut callback) = taken else {
            return false;
        };

        // No RefCell borrow is held here, so the callback may call `cancel`.
        callback(messages);

        let mut slot = guard.borrow_mut();
        if slot.cancelled {
            false
        } else {
            slot.callback = Some(callback);
            true
        }
    }

    /// Record the watch a reconnect opened. Returns `false` once cancelled.
    fn set_watch(&self, id: WatchId) -> bool {
        let guard = self.slot.lock();
        let mut slot = guard.borrow_mut();
        if slot.cancelled {
            return false;
        }
        slot.watch_id = Some(id);
        true
    }

    /// Cancel, dropping the callback. Returns the watch to remove the first
    /// time only.
    fn cancel(&self) -> Option<WatchId> {
        let guard = self.slot.lock();
        let mut slot = guard.borrow_mut();
        slot.cancelled = true;
        slot.callback = None;
        slot.watch_id.take()
    }

    fn is_cancelled(&self) -> bool {
        self.slot.lock().borrow().cancelled
    }
}

/// Live subscription to one conversation.
///
/// Dropping the handle unsubscribes.
pub struct SubscriptionHandle {
    id: Uuid,
    conversation: ConversationId,
    delivery: Arc<Delivery>,
    backend: Arc<dyn Backend>,
}

impl SubscriptionHandle {
    /// Subscription identifier.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Conversation this subscription delivers.
    #[must_use]
    pub const fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Whether deliveries may still happen.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.delivery.is_cancelled()
    }

    /// Stop deliveries. Idempotent, and safe to call from inside the
    /// subscription's own callback.
    pub fn unsubscribe(&self) {
        if let Some(watch_id) = self.delivery.cancel() {
            self.backend.unwatch(watch_id);
            tracing::debug!(subscription = %self.id, conversation = %self.conversation, "unsubscribed");
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

/// Append-only message log over a [`Backend`].
pub struct MessageLog {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
}

impl MessageLog {
    /// Create a log over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the backoff used when a subscription has to re-watch.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Append a message to conversation `id`.
    ///
    /// Resolves once the backend acknowledged the write; the returned
    /// message carries the backend-assigned sequence.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for an empty body or a sender outside the
    /// conversation, and `BackendUnavailable` if the write failed.
    pub async fn append(&self, id: &ConversationId, draft: NewMessage) -> Result<Message, ChatError> {
        if draft.body.trim().is_empty() {
            return Err(ChatError::invalid("message body is empty"));
        }
        if !id.involves(&draft.sender) {
            return Err(ChatError::invalid(format!(
                "{} is not a participant of {id}",
                draft.sender
            )));
        }

        let value = serde_json::to_value(MessageRecord::of(&draft))
            .map_err(|e| ChatError::Corrupt(e.to_string()))?;
        let key = self
            .backend
            .append_child(&messages_path(id), value)
            .await
            .map_err(|e| {
                tracing::warn!(conversation = %id, error = %e, "append failed");
                ChatError::from(e)
            })?;

        tracing::debug!(conversation = %id, %key, sender = %draft.sender, "appended message");
        Ok(Message::committed(id.clone(), draft, key))
    }

    /// Read the current history of `id` once.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the backend cannot be read.
    pub async fn read(&self, id: &ConversationId) -> Result<Vec<Message>, ChatError> {
        let value = self.backend.read_once(&messages_path(id)).await?;
        Ok(decode_history(id, value))
    }

    /// Subscribe to conversation `id`.
    ///
    /// `on_update` first receives the current history (possibly empty),
    /// then the full history again after every change, until the handle is
    /// unsubscribed or dropped. If the backend drops the watch later on, the
    /// subscription re-watches with backoff and resumes with a full
    /// delivery.
    ///
    /// # Errors
    /// Returns `BackendUnavailable` if the initial watch cannot be opened.
    pub async fn subscribe<F>(
        &self,
        id: &ConversationId,
        on_update: F,
    ) -> Result<SubscriptionHandle, ChatError>
    where
        F: FnMut(&[Message]) + Send + 'static,
    {
        let watch = self.backend.watch(&messages_path(id)).await?;
        let delivery = Arc::new(Delivery::new(Box::new(on_update), watch.id()));
        let handle = SubscriptionHandle {
            id: Uuid::new_v4(),
            conversation: id.clone(),
            delivery: Arc::clone(&delivery),
            backend: Arc::clone(&self.backend),
        };

        tokio::spawn(pump(
            Arc::clone(&self.backend),
            id.clone(),
            watch,
            delivery,
            self.retry,
        ));

        tracing::debug!(subscription = %handle.id, conversation = %id, "subscribed");
        Ok(handle)
    }

    /// Stop a subscription. Same as [`SubscriptionHandle::unsubscribe`].
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        handle.unsubscribe();
    }
}

/// Forward watch snapshots to the callback until cancelled.
async fn pump(
    backend: Arc<dyn Backend>,
    id: ConversationId,
    watch: Watch,
    delivery: Arc<Delivery>,
    retry: RetryPolicy,
) {
    let mut watch_id = watch.id();
    let mut events = watch.into_stream();
    loop {
        match events.next().await {
            Some(Ok(value)) => {
                let messages = decode_history(&id, value);
                if !delivery.deliver(&messages) {
                    break;
                }
                continue;
            }
            Some(Err(e)) => {
                tracing::warn!(conversation = %id, error = %e, "subscription lost its watch");
            }
            None if delivery.is_cancelled() => break,
            None => {
                tracing::warn!(conversation = %id, "watch closed by backend");
            }
        }

        match rewatch(backend.as_ref(), &id, &delivery, retry).await {
            Some(next) => {
                watch_id = next.id();
                events = next.into_stream();
            }
            None => break,
        }
    }

    backend.unwatch(watch_id);
    tracing::debug!(conversation = %id, "subscription pump stopped");
}

/// Re-open the watch with exponential backoff. `None` once cancelled.
async fn rewatch(
    backend: &dyn Backend,
    id: &ConversationId,
    delivery: &Delivery,
    retry: RetryPolicy,
) -> Option<Watch> {
    let path = messages_path(id);
    let mut delay = retry.initial_delay;
    loop {
        tokio::time::sleep(delay).await;
        if delivery.is_cancelled() {
            return None;
        }
        match backend.watch(&path).await {
            Ok(watch) => {
                if delivery.set_watch(watch.id()) {
                    tracing::info!(conversation = %id, "subscription resumed");
                    return Some(watch);
                }
                backend.unwatch(watch.id());
                return None;
            }
            Err(e) => {
                delay = retry.next_delay(delay);
                tracing::warn!(
                    conversation = %id,
                    error = %e,
                    retry_in = ?delay,
                    "re-watch failed"
                );
            }
        }
    }
}
