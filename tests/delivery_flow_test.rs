// Delivery-path integration tests over the public API: presence registry,
// conversation rooms, and the delivery coordinator, with raw channel halves
// standing in for websocket sessions. The database-backed message store is
// exercised separately; everything here runs without external services.

use chrono::Utc;
use realtime_messaging_service::models::message::{Message, MessageStatus, MessageType};
use realtime_messaging_service::services::delivery::DeliveryCoordinator;
use realtime_messaging_service::websocket::message_types::ServerEvent;
use realtime_messaging_service::websocket::{ConnectionId, ConversationRooms, PresenceRegistry};
use std::collections::HashMap;
use uuid::Uuid;

fn coordinator() -> DeliveryCoordinator {
    DeliveryCoordinator::new(PresenceRegistry::new(), ConversationRooms::new())
}

fn sample_message(sender: Uuid, receiver: Uuid) -> Message {
    let now = Utc::now();
    Message {
        id: Uuid::new_v4(),
        conversation_id: realtime_messaging_service::models::conversation_id(sender, receiver),
        sender_id: sender,
        receiver_id: receiver,
        content: "hey".into(),
        message_type: MessageType::Text,
        status: MessageStatus::Sent,
        is_read: false,
        read_at: None,
        reply_to: None,
        original_message: None,
        reactions: HashMap::new(),
        edited: false,
        edited_at: None,
        deleted: false,
        deleted_at: None,
        created_at: now,
        updated_at: now,
    }
}

#[tokio::test]
async fn offline_recipient_is_a_silent_miss() {
    let delivery = coordinator();
    let sender = Uuid::new_v4();
    let receiver = Uuid::new_v4();

    let mut message = sample_message(sender, receiver);
    message.status = MessageStatus::Delivered;
    let reached = delivery
        .push_to_user(receiver, &ServerEvent::ReceiveMessage { message })
        .await
        .unwrap();

    // Nobody is connected: status would stay `sent` and no event fires.
    assert_eq!(reached, 0);
}

#[tokio::test]
async fn online_recipient_receives_a_delivered_message() {
    let delivery = coordinator();
    let sender = Uuid::new_v4();
    let receiver = Uuid::new_v4();
    let receiver_conn = ConnectionId::new();

    let mut rx = delivery.presence().connect(receiver_conn).await;
    delivery
        .presence()
        .identify(receiver_conn, receiver, "bea")
        .await
        .unwrap();

    let mut message = sample_message(sender, receiver);
    message.status = MessageStatus::Delivered;
    let reached = delivery
        .push_to_user(receiver, &ServerEvent::ReceiveMessage { message })
        .await
        .unwrap();
    assert_eq!(reached, 1);

    let payload = rx.recv().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(json["type"], "receive_message");
    assert_eq!(json["message"]["status"], "delivered");
    assert_eq!(json["message"]["sender_id"], sender.to_string());
}

#[tokio::test]
async fn read_receipt_reaches_the_sender() {
    let delivery = coordinator();
    let sender = Uuid::new_v4();
    let reader = Uuid::new_v4();
    let sender_conn = ConnectionId::new();

    let mut sender_rx = delivery.presence().connect(sender_conn).await;
    delivery
        .presence()
        .identify(sender_conn, sender, "ada")
        .await
        .unwrap();

    let message_id = Uuid::new_v4();
    let reached = delivery
        .push_to_user(
            sender,
            &ServerEvent::MessageRead {
                message_id,
                read_by: reader,
                read_at: Utc::now(),
            },
        )
        .await
        .unwrap();
    assert_eq!(reached, 1);

    let payload = sender_rx.recv().await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&payload).unwrap();
    assert_eq!(json["type"], "message_read");
    assert_eq!(json["message_id"], message_id.to_string());
    assert_eq!(json["read_by"], reader.to_string());
}

#[tokio::test]
async fn every_session_of_a_user_gets_the_push() {
    let delivery = coordinator();
    let user = Uuid::new_v4();
    let phone = ConnectionId::new();
    let laptop = ConnectionId::new();

    let mut phone_rx = delivery.presence().connect(phone).await;
    let mut laptop_rx = delivery.presence().connect(laptop).await;
    delivery.presence().identify(phone, user, "ada").await.unwrap();
    delivery.presence().identify(laptop, user, "ada").await.unwrap();

    let event = ServerEvent::UserTyping {
        sender_id: Uuid::new_v4(),
        is_typing: true,
        conversation_id: "a_b".into(),
        timestamp: Utc::now(),
    };
    let reached = delivery.push_to_user(user, &event).await.unwrap();

    assert_eq!(reached, 2);
    assert!(phone_rx.try_recv().is_ok());
    assert!(laptop_rx.try_recv().is_ok());
}

#[tokio::test]
async fn offline_broadcast_waits_for_the_last_session() {
    let registry = PresenceRegistry::new();
    let user = Uuid::new_v4();
    let first = ConnectionId::new();
    let second = ConnectionId::new();

    let _rx1 = registry.connect(first).await;
    let _rx2 = registry.connect(second).await;
    registry.identify(first, user, "ada").await.unwrap();
    registry.identify(second, user, "ada").await.unwrap();

    let (_, last) = registry.disconnect(first).await.unwrap();
    assert!(!last, "first disconnect must not announce offline");

    let (entry, last) = registry.disconnect(second).await.unwrap();
    assert!(last, "second disconnect takes the user fully offline");
    assert_eq!(entry.user_id, user);
}

#[tokio::test]
async fn conversation_rooms_fan_out_to_joined_participants_only() {
    let delivery = coordinator();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let outsider = Uuid::new_v4();
    let a_conn = ConnectionId::new();
    let b_conn = ConnectionId::new();
    let outsider_conn = ConnectionId::new();

    let mut a_rx = delivery.presence().connect(a_conn).await;
    let mut b_rx = delivery.presence().connect(b_conn).await;
    let mut outsider_rx = delivery.presence().connect(outsider_conn).await;
    delivery.presence().identify(a_conn, a, "a").await.unwrap();
    delivery.presence().identify(b_conn, b, "b").await.unwrap();
    delivery
        .presence()
        .identify(outsider_conn, outsider, "c")
        .await
        .unwrap();

    let conversation = realtime_messaging_service::models::conversation_id(a, b);
    delivery.join_conversation(&conversation, a_conn).await;
    delivery.join_user_connections(&conversation, b).await;

    let event = ServerEvent::ConversationUpdate {
        conversation_id: conversation.clone(),
        last_message: sample_message(a, b),
        timestamp: Utc::now(),
    };
    let reached = delivery
        .broadcast_to_conversation(&conversation, &event, None)
        .await
        .unwrap();

    assert_eq!(reached, 2);
    assert!(a_rx.try_recv().is_ok());
    assert!(b_rx.try_recv().is_ok());
    assert!(
        outsider_rx.try_recv().is_err(),
        "non-participants never hear conversation traffic"
    );
}
