use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::errors::AppError;
use crate::pipeline::TurnOutcome;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub content: String,
}

/// POST /api/v1/conversations/:id/query
pub async fn handle_query(
    State(state): State<AppState>,
    Path(conversation_id): Path<i64>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<TurnOutcome>, AppError> {
    let outcome = state
        .pipeline
        .run_turn(conversation_id, &req.content)
        .await?;
    Ok(Json(outcome))
}
