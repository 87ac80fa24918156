use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_postgres::Row;
use uuid::Uuid;

/// Hard cap on message content length, matching the store schema.
pub const MAX_CONTENT_LENGTH: usize = 2000;

/// Column list shared by every query that materializes a full `Message`.
pub const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, receiver_id, content, \
     message_type, status, is_read, read_at, reply_to, original_message, reactions, \
     edited, edited_at, deleted, deleted_at, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Text,
    Image,
    File,
    Forwarded,
    Reply,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
            MessageType::Forwarded => "forwarded",
            MessageType::Reply => "reply",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "image" => MessageType::Image,
            "file" => MessageType::File,
            "forwarded" => MessageType::Forwarded,
            "reply" => MessageType::Reply,
            _ => MessageType::Text,
        }
    }
}

/// Delivery lifecycle of a message. Transitions are strictly forward:
/// sent -> delivered -> read. Downgrades are rejected at the store layer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    #[default]
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn from_db(value: &str) -> Self {
        match value {
            "delivered" => MessageStatus::Delivered,
            "read" => MessageStatus::Read,
            _ => MessageStatus::Sent,
        }
    }

    pub fn can_advance_to(self, next: MessageStatus) -> bool {
        next > self
    }
}

/// Message row matching the `messages` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: String,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub reply_to: Option<Uuid>,
    pub original_message: Option<Uuid>,
    /// One reaction token per user id; a second reaction from the same user
    /// replaces the first.
    pub reactions: HashMap<String, String>,
    pub edited: bool,
    pub edited_at: Option<DateTime<Utc>>,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    pub fn from_row(row: &Row) -> Self {
        let message_type: String = row.get("message_type");
        let status: String = row.get("status");
        let reactions: serde_json::Value = row.get("reactions");

        Self {
            id: row.get("id"),
            conversation_id: row.get("conversation_id"),
            sender_id: row.get("sender_id"),
            receiver_id: row.get("receiver_id"),
            content: row.get("content"),
            message_type: MessageType::from_db(&message_type),
            status: MessageStatus::from_db(&status),
            is_read: row.get("is_read"),
            read_at: row.get("read_at"),
            reply_to: row.get("reply_to"),
            original_message: row.get("original_message"),
            reactions: serde_json::from_value(reactions).unwrap_or_default(),
            edited: row.get("edited"),
            edited_at: row.get("edited_at"),
            deleted: row.get("deleted"),
            deleted_at: row.get("deleted_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_advances_forward() {
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Delivered));
        assert!(MessageStatus::Sent.can_advance_to(MessageStatus::Read));
        assert!(MessageStatus::Delivered.can_advance_to(MessageStatus::Read));

        assert!(!MessageStatus::Delivered.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Delivered));
        assert!(!MessageStatus::Read.can_advance_to(MessageStatus::Sent));
        assert!(!MessageStatus::Sent.can_advance_to(MessageStatus::Sent));
    }

    #[test]
    fn status_round_trips_through_db_text() {
        for status in [
            MessageStatus::Sent,
            MessageStatus::Delivered,
            MessageStatus::Read,
        ] {
            assert_eq!(MessageStatus::from_db(status.as_str()), status);
        }
        // Unknown values fall back to the initial state rather than failing.
        assert_eq!(MessageStatus::from_db("queued"), MessageStatus::Sent);
    }

    #[test]
    fn message_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageType::Forwarded).unwrap(),
            "\"forwarded\""
        );
        assert_eq!(
            serde_json::from_str::<MessageType>("\"reply\"").unwrap(),
            MessageType::Reply
        );
        assert_eq!(MessageType::default(), MessageType::Text);
    }
}
