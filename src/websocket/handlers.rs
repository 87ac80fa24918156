use chrono::Utc;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::message::{Message, MessageStatus, MessageType};
use crate::services::message_service::{MessageService, NewMessage};
use crate::state::AppState;
use crate::websocket::message_types::{ClientEvent, ServerEvent};
use crate::websocket::{ConnectionId, PresenceStatus};

/// Route one inbound event to its handler. Every failure is converted into a
/// `message_error` event back to the originating connection; nothing here may
/// tear down the connection or the process.
pub async fn dispatch(state: &AppState, origin: ConnectionId, event: ClientEvent) {
    let result = match event {
        ClientEvent::UserLogin { user_id, username } => {
            handle_user_login(state, origin, user_id, &username).await
        }
        ClientEvent::SendMessage {
            sender_id,
            receiver_id,
            content,
            message_type,
            reply_to,
        } => {
            handle_send_message(state, origin, sender_id, receiver_id, content, message_type, reply_to)
                .await
        }
        ClientEvent::TypingStart {
            sender_id,
            receiver_id,
            conversation_id,
        } => handle_typing(state, sender_id, receiver_id, conversation_id, true).await,
        ClientEvent::TypingStop {
            sender_id,
            receiver_id,
            conversation_id,
        } => handle_typing(state, sender_id, receiver_id, conversation_id, false).await,
        ClientEvent::MarkMessageRead { message_id, user_id } => {
            handle_mark_read(state, message_id, user_id).await
        }
        ClientEvent::AddReaction {
            message_id,
            user_id,
            reaction,
        } => handle_add_reaction(state, origin, message_id, user_id, reaction).await,
        ClientEvent::ForwardMessage {
            original_message_id,
            forward_to_users,
            sender_id,
        } => handle_forward(state, origin, original_message_id, &forward_to_users, sender_id).await,
        ClientEvent::UpdateStatus { status } => handle_update_status(state, origin, status).await,
    };

    if let Err(e) = result {
        tracing::warn!(connection = %origin, error = %e, "event handling failed");
        let _ = state
            .delivery
            .push_to_connection(
                origin,
                &ServerEvent::MessageError {
                    error: e.to_string(),
                },
            )
            .await;
    }
}

/// Application-level identify: register presence, announce to everyone else,
/// reply with the current roster and the caller's own status.
async fn handle_user_login(
    state: &AppState,
    origin: ConnectionId,
    user_id: Uuid,
    username: &str,
) -> AppResult<()> {
    let entry = state
        .delivery
        .presence()
        .identify(origin, user_id, username)
        .await
        .ok_or(AppError::Internal)?;

    state
        .delivery
        .broadcast_presence(
            &ServerEvent::UserOnline {
                user_id: entry.user_id,
                username: entry.username.clone(),
                status: entry.status,
                last_seen: entry.last_seen,
            },
            Some(origin),
        )
        .await?;

    let users = state.delivery.presence().online_users().await;
    state
        .delivery
        .push_to_connection(origin, &ServerEvent::OnlineUsers { users })
        .await?;
    state
        .delivery
        .push_to_connection(
            origin,
            &ServerEvent::UserStatusUpdate {
                user_id: entry.user_id,
                status: entry.status,
                last_seen: entry.last_seen,
            },
        )
        .await?;

    tracing::info!(user = %user_id, %username, "user online");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_send_message(
    state: &AppState,
    origin: ConnectionId,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    message_type: MessageType,
    reply_to: Option<Uuid>,
) -> AppResult<()> {
    let message = MessageService::send(
        &state.db,
        NewMessage {
            sender_id,
            receiver_id,
            content,
            message_type,
            reply_to,
        },
    )
    .await?;
    let conversation = message.conversation_id.clone();

    // Live delivery first: the recipient sees `delivered`, and the persisted
    // status follows. A miss leaves the message as `sent`.
    let mut delivered_view = message.clone();
    delivered_view.status = MessageStatus::Delivered;
    let reached = state
        .delivery
        .push_to_user(
            receiver_id,
            &ServerEvent::ReceiveMessage {
                message: delivered_view.clone(),
            },
        )
        .await?;
    let persisted = if reached > 0 {
        if !MessageService::mark_delivered(&state.db, message.id).await? {
            tracing::debug!(message = %message.id, "delivery transition skipped, status already past sent");
        }
        delivered_view
    } else {
        message.clone()
    };

    // Confirmation to the sender always carries the message as sent.
    state
        .delivery
        .push_to_connection(origin, &ServerEvent::MessageSent { message })
        .await?;

    // Lazy room membership for both participants, then the thread update.
    state.delivery.join_conversation(&conversation, origin).await;
    state
        .delivery
        .join_user_connections(&conversation, receiver_id)
        .await;
    state
        .delivery
        .broadcast_to_conversation(
            &conversation,
            &ServerEvent::ConversationUpdate {
                conversation_id: conversation.clone(),
                last_message: persisted,
                timestamp: Utc::now(),
            },
            None,
        )
        .await?;

    tracing::debug!(sender = %sender_id, receiver = %receiver_id, reached, "message relayed");
    Ok(())
}

/// Transient relay; nothing is persisted and an offline target just misses it.
async fn handle_typing(
    state: &AppState,
    sender_id: Uuid,
    receiver_id: Uuid,
    conversation_id: String,
    is_typing: bool,
) -> AppResult<()> {
    state
        .delivery
        .push_to_user(
            receiver_id,
            &ServerEvent::UserTyping {
                sender_id,
                is_typing,
                conversation_id,
                timestamp: Utc::now(),
            },
        )
        .await?;
    Ok(())
}

async fn handle_mark_read(state: &AppState, message_id: Uuid, reader_id: Uuid) -> AppResult<()> {
    let message = MessageService::mark_read(&state.db, message_id).await?;

    // Tell the original sender, unless they are the reader or offline.
    if message.sender_id != reader_id {
        state
            .delivery
            .push_to_user(
                message.sender_id,
                &ServerEvent::MessageRead {
                    message_id,
                    read_by: reader_id,
                    read_at: message.read_at.unwrap_or_else(Utc::now),
                },
            )
            .await?;
    }
    Ok(())
}

async fn handle_add_reaction(
    state: &AppState,
    origin: ConnectionId,
    message_id: Uuid,
    user_id: Uuid,
    reaction: String,
) -> AppResult<()> {
    let message = MessageService::add_reaction(&state.db, message_id, user_id, &reaction).await?;
    state
        .delivery
        .broadcast_to_conversation(
            &message.conversation_id,
            &ServerEvent::MessageReaction {
                message_id,
                user_id,
                reaction,
                timestamp: Utc::now(),
            },
            Some(origin),
        )
        .await?;
    Ok(())
}

async fn handle_forward(
    state: &AppState,
    origin: ConnectionId,
    original_message_id: Uuid,
    forward_to_users: &[Uuid],
    sender_id: Uuid,
) -> AppResult<()> {
    let outcome =
        MessageService::forward(&state.db, original_message_id, forward_to_users, sender_id)
            .await?;

    for forwarded in &outcome.forwarded {
        push_forwarded_copy(state, forwarded).await?;
    }

    state
        .delivery
        .push_to_connection(
            origin,
            &ServerEvent::MessageForwarded {
                forwarded: outcome.forwarded.len(),
                failed: outcome.failed,
            },
        )
        .await?;
    Ok(())
}

async fn push_forwarded_copy(state: &AppState, forwarded: &Message) -> AppResult<()> {
    let mut delivered_view = forwarded.clone();
    delivered_view.status = MessageStatus::Delivered;
    let reached = state
        .delivery
        .push_to_user(
            forwarded.receiver_id,
            &ServerEvent::ReceiveMessage {
                message: delivered_view,
            },
        )
        .await?;
    if reached > 0 && !MessageService::mark_delivered(&state.db, forwarded.id).await? {
        tracing::debug!(message = %forwarded.id, "delivery transition skipped, status already past sent");
    }
    Ok(())
}

async fn handle_update_status(
    state: &AppState,
    origin: ConnectionId,
    status: PresenceStatus,
) -> AppResult<()> {
    let entry = state
        .delivery
        .presence()
        .set_status(origin, status)
        .await
        .ok_or_else(|| AppError::Validation("connection has not identified".into()))?;

    state
        .delivery
        .broadcast_presence(
            &ServerEvent::UserStatusUpdate {
                user_id: entry.user_id,
                status: entry.status,
                last_seen: entry.last_seen,
            },
            Some(origin),
        )
        .await?;
    Ok(())
}

/// Transport-level disconnect: drop room memberships, deregister presence,
/// and announce offline only when the user's last connection closed.
pub async fn handle_disconnect(state: &AppState, connection_id: ConnectionId) {
    state.delivery.leave_all(connection_id).await;

    if let Some((entry, last)) = state.delivery.presence().disconnect(connection_id).await {
        if last {
            let _ = state
                .delivery
                .broadcast_presence(
                    &ServerEvent::UserOffline {
                        user_id: entry.user_id,
                        username: entry.username.clone(),
                        last_seen: Utc::now(),
                    },
                    None,
                )
                .await;
        }
        tracing::info!(user = %entry.user_id, username = %entry.username, last, "user disconnected");
    }
}
