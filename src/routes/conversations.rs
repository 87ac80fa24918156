use actix_web::{get, web, HttpResponse};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::conversation_service::ConversationService;
use crate::state::AppState;

/// GET /api/conversations/{user_id}
/// Every conversation the user participates in: latest message, the peer,
/// and the unread count, most recently active first.
#[get("/api/conversations/{user_id}")]
pub async fn get_conversations(
    state: web::Data<AppState>,
    user_id: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let summaries = ConversationService::list_for_user(&state.db, user_id.into_inner()).await?;
    Ok(HttpResponse::Ok().json(summaries))
}
