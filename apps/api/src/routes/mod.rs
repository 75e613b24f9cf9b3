pub mod health;

use axum::{
    routing::{delete, get, patch, post},
    Router,
};

use crate::catalog::handlers as catalog;
use crate::conversation::handlers as conversation;
use crate::pipeline::handlers as pipeline;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Schema catalog
        .route(
            "/api/v1/connections/:id/schemas",
            get(catalog::handle_get_schemas),
        )
        .route(
            "/api/v1/connections/:id/index",
            post(catalog::handle_rebuild_index),
        )
        .route(
            "/api/v1/schemas/table/:id",
            patch(catalog::handle_update_table_description),
        )
        .route(
            "/api/v1/schemas/field/:id",
            patch(catalog::handle_update_field_description),
        )
        // Conversations
        .route(
            "/api/v1/conversations",
            post(conversation::handle_create_conversation),
        )
        .route(
            "/api/v1/conversations/:id",
            delete(conversation::handle_delete_conversation),
        )
        .route(
            "/api/v1/conversations/:id/messages",
            get(conversation::handle_get_messages),
        )
        .route("/api/v1/conversations/:id/query", post(pipeline::handle_query))
        .route(
            "/api/v1/results/:id/saved",
            patch(conversation::handle_toggle_saved),
        )
        .with_state(state)
}
