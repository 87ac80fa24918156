use actix_web::{delete, get, patch, post, put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::conversation::conversation_id;
use crate::models::message::MessageType;
use crate::services::message_service::{MessageService, NewMessage, SearchScope};
use crate::state::AppState;
use crate::websocket::message_types::ServerEvent;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    #[serde(default)]
    pub message_type: MessageType,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
}

/// POST /api/messages
/// Persist a message without live delivery; the socket path owns pushes.
#[post("/api/messages")]
pub async fn send_message(
    state: web::Data<AppState>,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let message = MessageService::send(
        &state.db,
        NewMessage {
            sender_id: body.sender_id,
            receiver_id: body.receiver_id,
            content: body.content,
            message_type: body.message_type,
            reply_to: body.reply_to,
        },
    )
    .await?;
    Ok(HttpResponse::Created().json(message))
}

#[derive(Deserialize)]
pub struct HistoryParams {
    #[serde(default = "default_history_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_history_limit() -> i64 {
    50
}

/// GET /api/messages/conversation/{user_a}/{user_b}
/// Thread history between two users, oldest first. The pair order in the
/// path does not matter; both map to the same conversation.
#[get("/api/messages/conversation/{user_a}/{user_b}")]
pub async fn get_conversation_messages(
    state: web::Data<AppState>,
    path: web::Path<(Uuid, Uuid)>,
    params: web::Query<HistoryParams>,
) -> Result<HttpResponse, AppError> {
    let (user_a, user_b) = path.into_inner();
    let conversation = conversation_id(user_a, user_b);
    let messages =
        MessageService::history(&state.db, &conversation, params.limit, params.offset).await?;
    Ok(HttpResponse::Ok().json(messages))
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub limit: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    20
}

/// GET /api/messages/search/{conversation_id}?q=&page=&limit=
#[get("/api/messages/search/{conversation_id}")]
pub async fn search_conversation(
    state: web::Data<AppState>,
    conversation: web::Path<String>,
    params: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    let scope = SearchScope::Conversation(conversation.into_inner());
    let results =
        MessageService::search(&state.db, &scope, &params.q, params.page, params.limit).await?;
    Ok(HttpResponse::Ok().json(results))
}

/// GET /api/messages/search/user/{user_id}?q=&page=&limit=
/// Search across every conversation the user participates in.
#[get("/api/messages/search/user/{user_id}")]
pub async fn search_user_messages(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
    params: web::Query<SearchParams>,
) -> Result<HttpResponse, AppError> {
    let scope = SearchScope::User(user_id.into_inner());
    let results =
        MessageService::search(&state.db, &scope, &params.q, params.page, params.limit).await?;
    Ok(HttpResponse::Ok().json(results))
}

#[derive(Deserialize)]
pub struct EditMessageRequest {
    pub user_id: Uuid,
    pub content: String,
}

/// PATCH /api/messages/{id}
/// Edit a message (sender only) and notify the conversation room.
#[patch("/api/messages/{id}")]
pub async fn edit_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    body: web::Json<EditMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let message =
        MessageService::edit(&state.db, message_id.into_inner(), body.user_id, &body.content)
            .await?;

    let _ = state
        .delivery
        .broadcast_to_conversation(
            &message.conversation_id,
            &ServerEvent::MessageUpdated {
                message: message.clone(),
            },
            None,
        )
        .await;

    Ok(HttpResponse::Ok().json(message))
}

#[derive(Deserialize)]
pub struct DeleteParams {
    pub user_id: Uuid,
}

/// DELETE /api/messages/{id}?user_id=
/// Soft delete (sender only) and notify the conversation room.
#[delete("/api/messages/{id}")]
pub async fn delete_message(
    state: web::Data<AppState>,
    message_id: web::Path<Uuid>,
    params: web::Query<DeleteParams>,
) -> Result<HttpResponse, AppError> {
    let message =
        MessageService::soft_delete(&state.db, message_id.into_inner(), params.user_id).await?;

    let _ = state
        .delivery
        .broadcast_to_conversation(
            &message.conversation_id,
            &ServerEvent::MessageDeleted {
                message_id: message.id,
                conversation_id: message.conversation_id.clone(),
            },
            None,
        )
        .await;

    Ok(HttpResponse::NoContent().finish())
}

/// PUT /api/messages/read/{conversation_id}/{user_id}
/// Bulk-mark every unread message addressed to the user in this thread.
#[put("/api/messages/read/{conversation_id}/{user_id}")]
pub async fn mark_conversation_read(
    state: web::Data<AppState>,
    path: web::Path<(String, Uuid)>,
) -> Result<HttpResponse, AppError> {
    let (conversation, user_id) = path.into_inner();
    let updated = MessageService::mark_conversation_read(&state.db, &conversation, user_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "marked_read": updated })))
}
