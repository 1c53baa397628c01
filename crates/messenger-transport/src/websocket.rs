//! WebSocket transport for browser clients.

use std::sync::Arc;

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use messenger_chat::{ChatConfig, ChatEvents, MemorySessionStore, Messenger};
use messenger_core::Backend;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::{
    bridge::{ChannelEvents, handle_command},
    protocol::{ClientMessage, ErrorKind, ServerMessage},
};

/// Shared state of all sockets: one backend, one configuration.
#[derive(Clone)]
pub struct ChatHub {
    backend: Arc<dyn Backend>,
    config: Arc<ChatConfig>,
}

impl ChatHub {
    #[must_use]
    pub fn new(backend: Arc<dyn Backend>, config: ChatConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
        }
    }

    /// A fresh messenger for one connection. Each connection signs in
    /// independently, like a browser tab.
    #[must_use]
    pub fn messenger(&self, events: Arc<dyn ChatEvents>) -> Messenger {
        Messenger::with_config(
            Arc::clone(&self.backend),
            Arc::new(MemorySessionStore::new()),
            events,
            &self.config,
        )
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<ChatHub>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: ChatHub) {
    let connection = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending messages to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let messenger = hub.messenger(Arc::new(ChannelEvents::new(tx.clone())));
    tracing::debug!(%connection, "client connected");

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%connection, "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%connection, "Invalid client message: {e}");
                let _ = tx.send(ServerMessage::Error {
                    kind: ErrorKind::BadRequest,
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        if let Some(reply) = handle_command(&messenger, client_msg).await {
            let _ = tx.send(reply);
        }
    }

    messenger.close().await;
    send_task.abort();
    tracing::debug!(%connection, "client disconnected");
}

/// Create WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_ws_router(ChatHub::new(backend, config)));
/// ```
#[must_use]
pub fn create_ws_router(hub: ChatHub) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(hub)
}
