use std::sync::Arc;

use crate::catalog::SchemaCatalog;
use crate::conversation::ConversationStore;
use crate::pipeline::QueryPipeline;
use crate::relevance::SchemaIndexRegistry;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Default: `PgSchemaCatalog`.
    pub catalog: Arc<dyn SchemaCatalog>,
    /// Default: `PgConversationStore`.
    pub conversations: Arc<dyn ConversationStore>,
    /// Per-connection schema indexes, shared with the pipeline.
    pub relevance: Arc<SchemaIndexRegistry>,
    pub pipeline: Arc<QueryPipeline>,
}
