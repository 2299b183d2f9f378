use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::MessageResponse;

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    Ready { user_id: Uuid, name: String },

    /// A message was appended to a conversation
    MessageCreate { message: MessageResponse },

    /// The recipient's unread flag for a conversation changed
    UnreadUpdate { conversation_id: Uuid, unread: bool },
}

impl GatewayEvent {
    /// Returns the conversation this event is scoped to. Scoped events are
    /// only forwarded to connections subscribed to that conversation.
    pub fn conversation_id(&self) -> Option<Uuid> {
        match self {
            Self::MessageCreate { message } => Some(message.conversation_id),
            // Ready and UnreadUpdate are delivered to a single user directly
            _ => None,
        }
    }
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection
    Identify { token: String },

    /// Replace this connection's set of followed conversations.
    Subscribe { conversation_ids: Vec<Uuid> },

    /// Acknowledge a conversation as read.
    MarkRead { conversation_id: Uuid },
}
