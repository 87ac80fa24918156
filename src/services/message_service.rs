use deadpool_postgres::Pool;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::conversation::conversation_id;
use crate::models::message::{Message, MessageType, MAX_CONTENT_LENGTH, MESSAGE_COLUMNS};
use crate::websocket::message_types::ForwardFailure;

const MAX_REACTION_LENGTH: usize = 32;
const MAX_PAGE_SIZE: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 200;

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub reply_to: Option<Uuid>,
}

/// Search scope: one conversation, or everything a user participates in.
#[derive(Debug, Clone)]
pub enum SearchScope {
    Conversation(String),
    User(Uuid),
}

#[derive(Debug, Serialize)]
pub struct SearchResults {
    pub messages: Vec<Message>,
    pub total: i64,
    pub page: i64,
    pub pages: i64,
}

#[derive(Debug, Default)]
pub struct ForwardOutcome {
    pub forwarded: Vec<Message>,
    pub failed: Vec<ForwardFailure>,
}

pub struct MessageService;

impl MessageService {
    /// Validate and persist a new message. The conversation id is derived
    /// from the participant pair so both directions land in the same thread.
    /// Initial status is always `sent`.
    pub async fn send(db: &Pool, new: NewMessage) -> AppResult<Message> {
        let content = new.content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("message content cannot be empty".into()));
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(AppError::Validation(format!(
                "message content exceeds {MAX_CONTENT_LENGTH} characters"
            )));
        }

        let id = Uuid::new_v4();
        let conversation = conversation_id(new.sender_id, new.receiver_id);

        let client = db.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, message_type, reply_to) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7) \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &id,
                    &conversation,
                    &new.sender_id,
                    &new.receiver_id,
                    &content,
                    &new.message_type.as_str(),
                    &new.reply_to,
                ],
            )
            .await?;

        Ok(Message::from_row(&row))
    }

    /// Advance `sent` -> `delivered`. Guarded in SQL so a late or repeated
    /// call can never regress the status; returns whether the transition
    /// applied so callers can log skipped downgrades.
    pub async fn mark_delivered(db: &Pool, message_id: Uuid) -> AppResult<bool> {
        let client = db.get().await?;
        let updated = client
            .execute(
                "UPDATE messages SET status = 'delivered', updated_at = NOW() \
                 WHERE id = $1 AND status = 'sent'",
                &[&message_id],
            )
            .await?;
        Ok(updated == 1)
    }

    /// Advance to `read` from `sent` or `delivered`. A message that is
    /// already read is returned untouched, keeping its original `read_at`.
    pub async fn mark_read(db: &Pool, message_id: Uuid) -> AppResult<Message> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE messages \
                     SET status = 'read', is_read = TRUE, read_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND status <> 'read' \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[&message_id],
            )
            .await?;

        if let Some(row) = row {
            return Ok(Message::from_row(&row));
        }

        // Nothing updated: either the id is unknown or the message was
        // already read (a no-op, not an error).
        let row = client
            .query_opt(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"),
                &[&message_id],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(Message::from_row(&row))
    }

    /// Upsert one user's reaction on a message. The JSONB merge keys the map
    /// by user id, so a second reaction from the same user replaces the
    /// first — last write wins, never a duplicate.
    pub async fn add_reaction(
        db: &Pool,
        message_id: Uuid,
        user_id: Uuid,
        reaction: &str,
    ) -> AppResult<Message> {
        let reaction = reaction.trim();
        if reaction.is_empty() || reaction.chars().count() > MAX_REACTION_LENGTH {
            return Err(AppError::Validation("invalid reaction".into()));
        }

        let client = db.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE messages \
                     SET reactions = reactions || jsonb_build_object($2::text, $3::text), \
                         updated_at = NOW() \
                     WHERE id = $1 AND deleted = FALSE \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[&message_id, &user_id.to_string(), &reaction],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        Ok(Message::from_row(&row))
    }

    /// Fan a message out to several recipients as independent forwarded
    /// copies. One target failing does not abort the others; failures are
    /// accumulated and reported alongside the successes.
    pub async fn forward(
        db: &Pool,
        original_message_id: Uuid,
        forward_to: &[Uuid],
        sender_id: Uuid,
    ) -> AppResult<ForwardOutcome> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1 AND deleted = FALSE"
                ),
                &[&original_message_id],
            )
            .await?
            .ok_or(AppError::NotFound)?;
        let original = Message::from_row(&row);
        drop(client);

        let mut outcome = ForwardOutcome::default();
        for &receiver_id in forward_to {
            match Self::insert_forward(db, &original, sender_id, receiver_id).await {
                Ok(message) => outcome.forwarded.push(message),
                Err(e) => {
                    tracing::warn!(
                        original = %original_message_id,
                        receiver = %receiver_id,
                        error = %e,
                        "forward target failed"
                    );
                    outcome.failed.push(ForwardFailure {
                        receiver_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(outcome)
    }

    async fn insert_forward(
        db: &Pool,
        original: &Message,
        sender_id: Uuid,
        receiver_id: Uuid,
    ) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let conversation = conversation_id(sender_id, receiver_id);

        let client = db.get().await?;
        let row = client
            .query_one(
                &format!(
                    "INSERT INTO messages (id, conversation_id, sender_id, receiver_id, content, message_type, original_message) \
                     VALUES ($1, $2, $3, $4, $5, 'forwarded', $6) \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[
                    &id,
                    &conversation,
                    &sender_id,
                    &receiver_id,
                    &original.content,
                    &original.id,
                ],
            )
            .await?;
        Ok(Message::from_row(&row))
    }

    /// Case-insensitive substring search over message content, newest first,
    /// excluding soft-deleted rows. Queries shorter than two characters
    /// (after trimming) are rejected.
    pub async fn search(
        db: &Pool,
        scope: &SearchScope,
        query: &str,
        page: i64,
        page_size: i64,
    ) -> AppResult<SearchResults> {
        let query = query.trim();
        if query.chars().count() < 2 {
            return Err(AppError::Validation(
                "search query must be at least 2 characters".into(),
            ));
        }
        let page = page.max(1);
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1) * page_size;
        let pattern = format!("%{}%", escape_like(query));

        let client = db.get().await?;
        let (total, rows) = match scope {
            SearchScope::Conversation(conversation) => {
                let total: i64 = client
                    .query_one(
                        "SELECT COUNT(*) FROM messages \
                         WHERE conversation_id = $1 AND deleted = FALSE AND content ILIKE $2",
                        &[conversation, &pattern],
                    )
                    .await?
                    .get(0);
                let rows = client
                    .query(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages \
                             WHERE conversation_id = $1 AND deleted = FALSE AND content ILIKE $2 \
                             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                        ),
                        &[conversation, &pattern, &page_size, &offset],
                    )
                    .await?;
                (total, rows)
            }
            SearchScope::User(user_id) => {
                let total: i64 = client
                    .query_one(
                        "SELECT COUNT(*) FROM messages \
                         WHERE (sender_id = $1 OR receiver_id = $1) \
                           AND deleted = FALSE AND content ILIKE $2",
                        &[user_id, &pattern],
                    )
                    .await?
                    .get(0);
                let rows = client
                    .query(
                        &format!(
                            "SELECT {MESSAGE_COLUMNS} FROM messages \
                             WHERE (sender_id = $1 OR receiver_id = $1) \
                               AND deleted = FALSE AND content ILIKE $2 \
                             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
                        ),
                        &[user_id, &pattern, &page_size, &offset],
                    )
                    .await?;
                (total, rows)
            }
        };

        Ok(SearchResults {
            messages: rows.iter().map(Message::from_row).collect(),
            total,
            page,
            pages: (total + page_size - 1) / page_size,
        })
    }

    /// Thread history, oldest first, soft-deleted rows excluded.
    pub async fn history(
        db: &Pool,
        conversation: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<Message>> {
        let limit = limit.clamp(1, MAX_HISTORY_LIMIT);
        let offset = offset.max(0);

        let client = db.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages \
                     WHERE conversation_id = $1 AND deleted = FALSE \
                     ORDER BY created_at ASC LIMIT $2 OFFSET $3"
                ),
                &[&conversation, &limit, &offset],
            )
            .await?;
        Ok(rows.iter().map(Message::from_row).collect())
    }

    /// Replace the content of a message the editor sent.
    pub async fn edit(
        db: &Pool,
        message_id: Uuid,
        editor_id: Uuid,
        content: &str,
    ) -> AppResult<Message> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("message content cannot be empty".into()));
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(AppError::Validation(format!(
                "message content exceeds {MAX_CONTENT_LENGTH} characters"
            )));
        }

        let client = db.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE messages \
                     SET content = $3, edited = TRUE, edited_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND sender_id = $2 AND deleted = FALSE \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[&message_id, &editor_id, &content],
            )
            .await?;

        match row {
            Some(row) => Ok(Message::from_row(&row)),
            None => {
                let err = Self::ownership_error(&client, message_id).await?;
                Err(err)
            }
        }
    }

    /// Soft-delete a message the requester sent. The row is kept for history
    /// queries that explicitly include deleted content; everything else
    /// filters it out.
    pub async fn soft_delete(db: &Pool, message_id: Uuid, requester_id: Uuid) -> AppResult<Message> {
        let client = db.get().await?;
        let row = client
            .query_opt(
                &format!(
                    "UPDATE messages \
                     SET deleted = TRUE, deleted_at = NOW(), updated_at = NOW() \
                     WHERE id = $1 AND sender_id = $2 AND deleted = FALSE \
                     RETURNING {MESSAGE_COLUMNS}"
                ),
                &[&message_id, &requester_id],
            )
            .await?;

        match row {
            Some(row) => Ok(Message::from_row(&row)),
            None => {
                let err = Self::ownership_error(&client, message_id).await?;
                Err(err)
            }
        }
    }

    /// Bulk-mark everything addressed to `user_id` in one conversation as
    /// read. Returns the number of messages transitioned.
    pub async fn mark_conversation_read(
        db: &Pool,
        conversation: &str,
        user_id: Uuid,
    ) -> AppResult<u64> {
        let client = db.get().await?;
        let updated = client
            .execute(
                "UPDATE messages \
                 SET status = 'read', is_read = TRUE, \
                     read_at = COALESCE(read_at, NOW()), updated_at = NOW() \
                 WHERE conversation_id = $1 AND receiver_id = $2 AND is_read = FALSE",
                &[&conversation, &user_id],
            )
            .await?;
        Ok(updated)
    }

    /// Distinguish "not yours" from "does not exist" after a guarded update
    /// matched no row.
    async fn ownership_error(
        client: &deadpool_postgres::Client,
        message_id: Uuid,
    ) -> AppResult<AppError> {
        let exists = client
            .query_opt(
                "SELECT 1 FROM messages WHERE id = $1 AND deleted = FALSE",
                &[&message_id],
            )
            .await?;
        Ok(if exists.is_some() {
            AppError::Forbidden
        } else {
            AppError::NotFound
        })
    }
}

/// Escape LIKE wildcards so user input is matched literally.
fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
    use std::str::FromStr;
    use tokio_postgres::NoTls;

    /// Pool pointing at nothing; fine for paths that fail validation before
    /// ever borrowing a client.
    fn detached_pool() -> Pool {
        let config =
            tokio_postgres::Config::from_str("postgresql://unused@127.0.0.1:1/unused").unwrap();
        let manager = Manager::from_config(
            config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        Pool::builder(manager).max_size(1).build().unwrap()
    }

    #[tokio::test]
    async fn search_rejects_short_queries() {
        let pool = detached_pool();
        let scope = SearchScope::Conversation("a_b".into());

        let err = MessageService::search(&pool, &scope, " h ", 1, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let err = MessageService::search(&pool, &scope, "", 1, 20)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn send_rejects_empty_and_oversized_content() {
        let pool = detached_pool();
        let base = NewMessage {
            sender_id: Uuid::new_v4(),
            receiver_id: Uuid::new_v4(),
            content: "   ".into(),
            message_type: MessageType::Text,
            reply_to: None,
        };

        let err = MessageService::send(&pool, base.clone()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let oversized = NewMessage {
            content: "x".repeat(MAX_CONTENT_LENGTH + 1),
            ..base
        };
        let err = MessageService::send(&pool, oversized).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn reactions_reject_blank_tokens() {
        let pool = detached_pool();
        let err = MessageService::add_reaction(&pool, Uuid::new_v4(), Uuid::new_v4(), "  ")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn like_patterns_match_literally() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("back\\slash"), "back\\\\slash");
    }
}
