mod agent;
mod catalog;
mod config;
mod conversation;
mod db;
mod errors;
mod executor;
mod llm_client;
mod models;
mod pipeline;
mod relevance;
mod routes;
mod state;
#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::agent::LlmSqlAgent;
use crate::catalog::PgSchemaCatalog;
use crate::config::Config;
use crate::conversation::PgConversationStore;
use crate::db::create_pool;
use crate::executor::TargetDatabases;
use crate::llm_client::LlmClient;
use crate::pipeline::QueryPipeline;
use crate::relevance::{Embedder, HashingEmbedder, OpenAiEmbedder, SchemaIndexRegistry};
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!(
                "{}={}",
                env!("CARGO_CRATE_NAME"),
                &config.rust_log
            ))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting QueryDesk API v{}", env!("CARGO_PKG_VERSION"));

    // Application store
    let db = create_pool(&config.database_url).await?;
    let catalog = Arc::new(PgSchemaCatalog::new(db.clone()));
    let conversations = Arc::new(PgConversationStore::new(db));

    // Target databases
    let executor = Arc::new(TargetDatabases::new(Duration::from_secs(
        config.query_timeout_secs,
    )));

    // Relevance index
    let embedder: Arc<dyn Embedder> = match &config.embedding_api_key {
        Some(key) => Arc::new(OpenAiEmbedder::new(
            key.clone(),
            config.embedding_api_base.clone(),
            config.embedding_model.clone(),
        )?),
        None => {
            warn!("EMBEDDING_API_KEY not set, using the local hashing embedder");
            Arc::new(HashingEmbedder::default())
        }
    };
    info!("Embedder: {}", embedder.model());
    let relevance = Arc::new(SchemaIndexRegistry::new(
        catalog.clone(),
        executor.clone(),
        embedder,
        config.index_dir.clone(),
        config.relevance_threshold,
        config.relevance_top_k,
    ));

    // SQL agent
    let llm = LlmClient::new(config.anthropic_api_key.clone())?;
    info!("LLM client initialized (model: {})", llm_client::MODEL);
    let agent = Arc::new(LlmSqlAgent::new(llm, config.result_limit));

    let pipeline = Arc::new(QueryPipeline::new(
        catalog.clone(),
        conversations.clone(),
        relevance.clone(),
        agent,
        executor,
    ));

    let state = AppState {
        catalog,
        conversations,
        relevance,
        pipeline,
    };

    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
