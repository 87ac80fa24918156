use deadpool_postgres::Pool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::conversation::ConversationSummary;
use crate::models::message::{Message, MESSAGE_COLUMNS};

pub struct ConversationService;

impl ConversationService {
    /// Conversation summaries for one user: latest message per thread plus
    /// the count of messages addressed to them that are still unread,
    /// ordered most-recently-active first.
    ///
    /// Conversations are a derived view over the message store — nothing
    /// here is authoritative beyond the messages themselves.
    pub async fn list_for_user(db: &Pool, user_id: Uuid) -> AppResult<Vec<ConversationSummary>> {
        let client = db.get().await?;

        let last_messages = client
            .query(
                &format!(
                    "SELECT DISTINCT ON (conversation_id) {MESSAGE_COLUMNS} \
                     FROM messages \
                     WHERE (sender_id = $1 OR receiver_id = $1) AND deleted = FALSE \
                     ORDER BY conversation_id, created_at DESC"
                ),
                &[&user_id],
            )
            .await?;

        let unread_rows = client
            .query(
                "SELECT conversation_id, COUNT(*) FROM messages \
                 WHERE receiver_id = $1 AND is_read = FALSE AND deleted = FALSE \
                 GROUP BY conversation_id",
                &[&user_id],
            )
            .await?;
        let unread: HashMap<String, i64> = unread_rows
            .iter()
            .map(|row| (row.get(0), row.get(1)))
            .collect();

        let mut summaries: Vec<ConversationSummary> = last_messages
            .iter()
            .map(|row| {
                let message = Message::from_row(row);
                let peer_id = if message.sender_id == user_id {
                    message.receiver_id
                } else {
                    message.sender_id
                };
                ConversationSummary {
                    conversation_id: message.conversation_id.clone(),
                    peer_id,
                    unread_count: unread.get(&message.conversation_id).copied().unwrap_or(0),
                    last_message: message,
                }
            })
            .collect();

        summaries.sort_by(|a, b| b.last_message.created_at.cmp(&a.last_message.created_at));
        Ok(summaries)
    }
}
