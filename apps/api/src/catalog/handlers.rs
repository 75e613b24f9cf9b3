use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::schema::TableSchema;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SchemasResponse {
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Deserialize)]
pub struct DescriptionUpdate {
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct IndexRebuildResponse {
    pub connection_id: Uuid,
    pub indexed_tables: usize,
}

/// GET /api/v1/connections/:id/schemas
pub async fn handle_get_schemas(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<SchemasResponse>, AppError> {
    // 404 for unknown connections rather than an empty list
    state.catalog.connection(connection_id).await?;
    let tables = state.catalog.get_descriptions(connection_id).await?;
    Ok(Json(SchemasResponse { tables }))
}

/// PATCH /api/v1/schemas/table/:id
///
/// Description edits change the embedded corpus, so the connection's index is dropped
/// and rebuilt on the next question.
pub async fn handle_update_table_description(
    State(state): State<AppState>,
    Path(table_id): Path<Uuid>,
    Json(req): Json<DescriptionUpdate>,
) -> Result<StatusCode, AppError> {
    let connection_id = state
        .catalog
        .update_table_description(table_id, &req.description)
        .await?;
    state.relevance.invalidate(connection_id).await?;
    info!("Updated description of table {table_id}");
    Ok(StatusCode::NO_CONTENT)
}

/// PATCH /api/v1/schemas/field/:id
pub async fn handle_update_field_description(
    State(state): State<AppState>,
    Path(field_id): Path<Uuid>,
    Json(req): Json<DescriptionUpdate>,
) -> Result<StatusCode, AppError> {
    let connection_id = state
        .catalog
        .update_field_description(field_id, &req.description)
        .await?;
    state.relevance.invalidate(connection_id).await?;
    info!("Updated description of field {field_id}");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/connections/:id/index
pub async fn handle_rebuild_index(
    State(state): State<AppState>,
    Path(connection_id): Path<Uuid>,
) -> Result<Json<IndexRebuildResponse>, AppError> {
    let connection = state.catalog.connection(connection_id).await?;
    state.relevance.invalidate(connection_id).await?;
    let index = state.relevance.index_for(&connection).await?;
    Ok(Json(IndexRebuildResponse {
        connection_id,
        indexed_tables: index.len(),
    }))
}
