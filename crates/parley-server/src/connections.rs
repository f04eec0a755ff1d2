//! Live connections and the events pushed to them.
//!
//! Transports register one channel per connection and forward whatever
//! arrives on it.  A user may hold several connections at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_shared::{ConversationId, UserId};
use parley_store::Message;

pub type ConnectionId = u64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    MessageCreated {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        message: Message,
    },
    MessageDeleted {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        #[serde(rename = "messageId")]
        message_id: Uuid,
    },
    ConversationDeleted {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    Muted {
        #[serde(rename = "userId")]
        user_id: UserId,
        reason: String,
        #[serde(rename = "muteEnd")]
        mute_end: String,
    },
}

struct Connection {
    user_id: UserId,
    tx: mpsc::UnboundedSender<String>,
}

pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a connection for `user`.  Serialized events arrive on the
    /// returned receiver until [`ConnectionRegistry::unregister`] is called
    /// or the receiver is dropped.
    pub async fn register(&self, user: UserId) -> (ConnectionId, mpsc::UnboundedReceiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(connection = id, user = %user, "Connection registered");
        self.connections
            .write()
            .await
            .insert(id, Connection { user_id: user, tx });
        (id, rx)
    }

    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            debug!(connection = id, "Connection unregistered");
        }
        removed
    }

    pub async fn is_online(&self, user: &UserId) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|c| &c.user_id == user && !c.tx.is_closed())
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Push `event` to every connection of `user`.  Returns how many
    /// connections received it.
    pub async fn send_to_user(&self, user: &UserId, event: &ChatEvent) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };
        self.deliver(|c| &c.user_id == user, &payload).await
    }

    /// Push `event` to both participants of a conversation.
    pub async fn send_to_conversation(
        &self,
        conversation: &ConversationId,
        event: &ChatEvent,
    ) -> usize {
        let Some(payload) = encode(event) else {
            return 0;
        };
        self.deliver(|c| conversation.includes(&c.user_id), &payload)
            .await
    }

    async fn deliver(&self, matches: impl Fn(&Connection) -> bool, payload: &str) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (&id, connection) in connections.iter().filter(|(_, c)| matches(c)) {
                if connection.tx.send(payload.to_string()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(id);
                }
            }
        }

        if !closed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in closed {
                connections.remove(&id);
            }
        }
        delivered
    }
}

fn encode(event: &ChatEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(error = %e, "Failed to serialize chat event");
            None
        }
    }
}
