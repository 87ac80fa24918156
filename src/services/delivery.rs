use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::websocket::message_types::ServerEvent;
use crate::websocket::{ConnectionId, ConversationRooms, PresenceRegistry};

/// Bridges persisted message state to live connections.
///
/// Delivery is best-effort and at-most-once: a push either reaches a
/// currently-registered connection or it doesn't, in which case the message
/// simply stays `sent` until the recipient fetches history. There is no
/// offline queue and no retry.
#[derive(Clone)]
pub struct DeliveryCoordinator {
    presence: PresenceRegistry,
    rooms: ConversationRooms,
}

impl DeliveryCoordinator {
    pub fn new(presence: PresenceRegistry, rooms: ConversationRooms) -> Self {
        Self { presence, rooms }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    pub fn rooms(&self) -> &ConversationRooms {
        &self.rooms
    }

    /// Push an event to every live connection of a user. Returns the number
    /// of connections reached; zero is a delivery miss, not an error.
    pub async fn push_to_user(&self, user_id: Uuid, event: &ServerEvent) -> AppResult<usize> {
        let payload = encode(event)?;
        Ok(self.presence.send_to_user(user_id, &payload).await)
    }

    pub async fn push_to_connection(
        &self,
        connection_id: ConnectionId,
        event: &ServerEvent,
    ) -> AppResult<bool> {
        let payload = encode(event)?;
        Ok(self.presence.send_to_connection(connection_id, &payload).await)
    }

    /// Presence fan-out to every identified connection except (optionally)
    /// the originator.
    pub async fn broadcast_presence(
        &self,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> AppResult<usize> {
        let payload = encode(event)?;
        Ok(self.presence.broadcast_to_identified(&payload, except).await)
    }

    pub async fn join_conversation(&self, conversation_id: &str, connection_id: ConnectionId) {
        self.rooms.join(conversation_id, connection_id).await;
    }

    /// Join every live connection of a user to a conversation room. Used to
    /// pull the recipient into the room the first time either side sends.
    pub async fn join_user_connections(&self, conversation_id: &str, user_id: Uuid) {
        for connection_id in self.presence.user_connections(user_id).await {
            self.rooms.join(conversation_id, connection_id).await;
        }
    }

    /// Emit to every connection currently joined to a conversation room.
    pub async fn broadcast_to_conversation(
        &self,
        conversation_id: &str,
        event: &ServerEvent,
        except: Option<ConnectionId>,
    ) -> AppResult<usize> {
        let payload = encode(event)?;
        let mut delivered = 0;
        for member in self.rooms.members(conversation_id).await {
            if Some(member) == except {
                continue;
            }
            if self.presence.send_to_connection(member, &payload).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    pub async fn leave_all(&self, connection_id: ConnectionId) {
        self.rooms.leave_all(connection_id).await;
    }
}

fn encode(event: &ServerEvent) -> AppResult<String> {
    serde_json::to_string(event).map_err(|e| {
        tracing::error!(error = %e, "failed to encode server event");
        AppError::Internal
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::message_types::ServerEvent;
    use chrono::Utc;

    fn coordinator() -> DeliveryCoordinator {
        DeliveryCoordinator::new(PresenceRegistry::new(), ConversationRooms::new())
    }

    #[tokio::test]
    async fn push_to_offline_user_is_a_miss_not_an_error() {
        let delivery = coordinator();
        let event = ServerEvent::MessageError {
            error: "nope".into(),
        };
        let reached = delivery.push_to_user(Uuid::new_v4(), &event).await.unwrap();
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn conversation_broadcast_skips_the_excluded_origin() {
        let delivery = coordinator();
        let sender_conn = ConnectionId::new();
        let receiver_conn = ConnectionId::new();
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();

        let mut sender_rx = delivery.presence().connect(sender_conn).await;
        let mut receiver_rx = delivery.presence().connect(receiver_conn).await;
        delivery.presence().identify(sender_conn, sender, "a").await.unwrap();
        delivery
            .presence()
            .identify(receiver_conn, receiver, "b")
            .await
            .unwrap();

        delivery.join_conversation("a_b", sender_conn).await;
        delivery.join_user_connections("a_b", receiver).await;

        let event = ServerEvent::UserTyping {
            sender_id: sender,
            is_typing: true,
            conversation_id: "a_b".into(),
            timestamp: Utc::now(),
        };
        let delivered = delivery
            .broadcast_to_conversation("a_b", &event, Some(sender_conn))
            .await
            .unwrap();

        assert_eq!(delivered, 1);
        assert!(receiver_rx.try_recv().is_ok());
        assert!(sender_rx.try_recv().is_err(), "origin must not hear itself");
    }
}
