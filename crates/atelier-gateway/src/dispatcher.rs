use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::debug;
use uuid::Uuid;

use atelier_types::events::GatewayEvent;

/// Capacity of the shared event ring. Receivers that fall further behind
/// than this skip ahead and must catch up over HTTP.
const BROADCAST_CAPACITY: usize = 1024;

/// Fans gateway events out to connected clients.
///
/// Conversation-scoped events go through one broadcast channel; each
/// connection filters them against its own subscriptions. User-targeted
/// events go straight to every connection the user holds.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    broadcast_tx: broadcast::Sender<GatewayEvent>,

    /// Per-connection targeted send channels: user_id -> (conn_id -> sender)
    user_channels: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<GatewayEvent>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                user_channels: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to conversation-scoped events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Publish a conversation-scoped event. Having no listeners is not an error.
    pub fn publish(&self, event: GatewayEvent) {
        if self.inner.broadcast_tx.send(event).is_err() {
            debug!("No gateway listeners for published event");
        }
    }

    /// Register a connection for targeted events. Returns (conn_id, receiver).
    pub async fn register_connection(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .user_channels
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    pub async fn unregister_connection(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if let Some(conns) = channels.get_mut(&user_id) {
            conns.remove(&conn_id);
            if conns.is_empty() {
                channels.remove(&user_id);
            }
        }
    }

    /// Send a targeted event to every connection of a user.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some(conns) = channels.get(&user_id) {
            for tx in conns.values() {
                let _ = tx.send(event.clone());
            }
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .user_channels
            .read()
            .await
            .get(&user_id)
            .map_or(0, HashMap::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atelier_types::api::MessageResponse;
    use atelier_types::models::UserSummary;

    fn message_event(conversation_id: Uuid) -> GatewayEvent {
        GatewayEvent::MessageCreate {
            message: MessageResponse {
                id: Uuid::new_v4(),
                conversation_id,
                sender: UserSummary {
                    id: Uuid::new_v4(),
                    name: "Ana".into(),
                    avatar_url: String::new(),
                },
                text: "Hello".into(),
                created_at: chrono::Utc::now(),
            },
        }
    }

    #[tokio::test]
    async fn published_events_reach_subscribers() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        let conversation_id = Uuid::new_v4();

        dispatcher.publish(message_event(conversation_id));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.conversation_id(), Some(conversation_id));
    }

    #[tokio::test]
    async fn publish_without_listeners_is_silent() {
        let dispatcher = Dispatcher::new();
        dispatcher.publish(message_event(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn targeted_events_reach_every_connection_of_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let other = Uuid::new_v4();

        let (_, mut first) = dispatcher.register_connection(user).await;
        let (_, mut second) = dispatcher.register_connection(user).await;
        let (_, mut bystander) = dispatcher.register_connection(other).await;
        assert_eq!(dispatcher.connection_count(user).await, 2);

        let conversation_id = Uuid::new_v4();
        dispatcher
            .send_to_user(user, GatewayEvent::UnreadUpdate { conversation_id, unread: true })
            .await;

        for rx in [&mut first, &mut second] {
            match rx.recv().await.unwrap() {
                GatewayEvent::UnreadUpdate { conversation_id: id, unread } => {
                    assert_eq!(id, conversation_id);
                    assert!(unread);
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert!(bystander.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_drops_only_that_connection() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();

        let (first_id, _first) = dispatcher.register_connection(user).await;
        let (second_id, _second) = dispatcher.register_connection(user).await;

        dispatcher.unregister_connection(user, first_id).await;
        assert_eq!(dispatcher.connection_count(user).await, 1);

        dispatcher.unregister_connection(user, second_id).await;
        assert_eq!(dispatcher.connection_count(user).await, 0);
    }
}
