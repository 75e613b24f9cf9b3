use std::time::Duration;

use anyhow::{bail, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Tables the stores read and write. Applied externally from `migrations/`.
const REQUIRED_TABLES: [&str; 7] = [
    "connections",
    "schema_tables",
    "schema_fields",
    "schema_indexes",
    "conversations",
    "messages",
    "results",
];

/// Creates the PostgreSQL pool backing the catalog and conversation stores
/// and refuses to start against a database missing the application schema.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    info!("Connecting to PostgreSQL...");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    let missing = missing_tables(&pool).await?;
    if !missing.is_empty() {
        bail!(
            "Application schema is incomplete, missing tables: {}. Apply migrations/0001_initial.sql first.",
            missing.join(", ")
        );
    }

    info!("PostgreSQL connection pool established");
    Ok(pool)
}

async fn missing_tables(pool: &PgPool) -> Result<Vec<String>> {
    let present: Vec<String> = sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = current_schema()",
    )
    .fetch_all(pool)
    .await?;

    Ok(REQUIRED_TABLES
        .iter()
        .filter(|t| !present.iter().any(|p| p == *t))
        .map(|t| t.to_string())
        .collect())
}
