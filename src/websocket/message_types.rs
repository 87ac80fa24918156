use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::message::{Message, MessageType};
use crate::websocket::{PresenceEntry, PresenceStatus};

/// Inbound WebSocket events from client to server.
///
/// Payloads are validated structurally at the boundary; handler code never
/// inspects untyped fields. Events that fail to parse are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Application-level identify: binds the user to the connection and
    /// registers presence. Transport attach alone does not mark a user online.
    #[serde(rename = "user_login")]
    UserLogin { user_id: Uuid, username: String },

    #[serde(rename = "send_message")]
    SendMessage {
        sender_id: Uuid,
        receiver_id: Uuid,
        content: String,
        #[serde(default)]
        message_type: MessageType,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },

    #[serde(rename = "typing_start")]
    TypingStart {
        sender_id: Uuid,
        receiver_id: Uuid,
        conversation_id: String,
    },

    #[serde(rename = "typing_stop")]
    TypingStop {
        sender_id: Uuid,
        receiver_id: Uuid,
        conversation_id: String,
    },

    #[serde(rename = "mark_message_read")]
    MarkMessageRead { message_id: Uuid, user_id: Uuid },

    #[serde(rename = "add_reaction")]
    AddReaction {
        message_id: Uuid,
        user_id: Uuid,
        reaction: String,
    },

    #[serde(rename = "forward_message")]
    ForwardMessage {
        original_message_id: Uuid,
        forward_to_users: Vec<Uuid>,
        sender_id: Uuid,
    },

    #[serde(rename = "update_status")]
    UpdateStatus { status: PresenceStatus },
}

/// Outbound WebSocket events from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "user_online")]
    UserOnline {
        user_id: Uuid,
        username: String,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },

    #[serde(rename = "user_offline")]
    UserOffline {
        user_id: Uuid,
        username: String,
        last_seen: DateTime<Utc>,
    },

    /// Full roster sent to a connection right after it identifies.
    #[serde(rename = "online_users")]
    OnlineUsers { users: Vec<PresenceEntry> },

    #[serde(rename = "user_status_update")]
    UserStatusUpdate {
        user_id: Uuid,
        status: PresenceStatus,
        last_seen: DateTime<Utc>,
    },

    /// Confirmation to the sender; always carries the message as sent.
    #[serde(rename = "message_sent")]
    MessageSent { message: Message },

    /// Live delivery to the recipient; carries status `delivered`.
    #[serde(rename = "receive_message")]
    ReceiveMessage { message: Message },

    #[serde(rename = "message_read")]
    MessageRead {
        message_id: Uuid,
        read_by: Uuid,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "message_reaction")]
    MessageReaction {
        message_id: Uuid,
        user_id: Uuid,
        reaction: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "user_typing")]
    UserTyping {
        sender_id: Uuid,
        is_typing: bool,
        conversation_id: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "conversation_update")]
    ConversationUpdate {
        conversation_id: String,
        last_message: Message,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message_forwarded")]
    MessageForwarded {
        forwarded: usize,
        failed: Vec<ForwardFailure>,
    },

    #[serde(rename = "message_updated")]
    MessageUpdated { message: Message },

    #[serde(rename = "message_deleted")]
    MessageDeleted {
        message_id: Uuid,
        conversation_id: String,
    },

    #[serde(rename = "message_error")]
    MessageError { error: String },
}

/// One failed fan-out target of a forward operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardFailure {
    pub receiver_id: Uuid,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_parse_by_tag() {
        let user_id = Uuid::new_v4();
        let payload = format!(
            r#"{{"type":"user_login","user_id":"{user_id}","username":"ada"}}"#
        );
        match serde_json::from_str::<ClientEvent>(&payload).unwrap() {
            ClientEvent::UserLogin {
                user_id: parsed,
                username,
            } => {
                assert_eq!(parsed, user_id);
                assert_eq!(username, "ada");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn send_message_defaults_to_text() {
        let sender = Uuid::new_v4();
        let receiver = Uuid::new_v4();
        let payload = format!(
            r#"{{"type":"send_message","sender_id":"{sender}","receiver_id":"{receiver}","content":"hey"}}"#
        );
        match serde_json::from_str::<ClientEvent>(&payload).unwrap() {
            ClientEvent::SendMessage {
                message_type,
                reply_to,
                ..
            } => {
                assert_eq!(message_type, MessageType::Text);
                assert!(reply_to.is_none());
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_names_fail_to_parse() {
        // The gateway ignores these instead of surfacing an error.
        let payload = r#"{"type":"subscribe_everything"}"#;
        assert!(serde_json::from_str::<ClientEvent>(payload).is_err());
    }

    #[test]
    fn outbound_events_carry_wire_tags() {
        let event = ServerEvent::MessageError {
            error: "validation error: message content cannot be empty".into(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "message_error");

        let event = ServerEvent::UserTyping {
            sender_id: Uuid::new_v4(),
            is_typing: true,
            conversation_id: "a_b".into(),
            timestamp: Utc::now(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(json["type"], "user_typing");
        assert_eq!(json["is_typing"], true);
    }
}
