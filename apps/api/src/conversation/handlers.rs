use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::conversation::{Conversation, MessageWithResults};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub connection_id: Uuid,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct MessagesResponse {
    pub messages: Vec<MessageWithResults>,
}

#[derive(Debug, Serialize)]
pub struct SavedResponse {
    pub is_saved: bool,
}

/// POST /api/v1/conversations
pub async fn handle_create_conversation(
    State(state): State<AppState>,
    Json(req): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<Conversation>), AppError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation(
            "Conversation name must not be empty".to_string(),
        ));
    }

    let conversation = state
        .conversations
        .create_conversation(req.connection_id, name)
        .await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

/// DELETE /api/v1/conversations/:id
pub async fn handle_delete_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> Result<StatusCode, AppError> {
    state
        .conversations
        .delete_conversation(conversation_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/conversations/:id/messages
pub async fn handle_get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
) -> Result<Json<MessagesResponse>, AppError> {
    let messages = state.conversations.messages(conversation_id).await?;
    Ok(Json(MessagesResponse { messages }))
}

/// PATCH /api/v1/results/:id/saved
pub async fn handle_toggle_saved(
    State(state): State<AppState>,
    Path(result_id): Path<i64>,
) -> Result<Json<SavedResponse>, AppError> {
    let is_saved = state.conversations.toggle_saved(result_id).await?;
    Ok(Json(SavedResponse { is_saved }))
}
