//! Schema Catalog: per-connection table and field metadata. The relevance
//! index embeds it and the agent sees it as context.

pub mod handlers;
pub mod render;
pub mod store;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::connection::Connection;
use crate::models::schema::{IntrospectedTable, TableSchema};

pub use store::PgSchemaCatalog;

/// Read/write access to connections, their schema descriptions, and the
/// per-connection index ledger.
///
/// Carried in `AppState` as `Arc<dyn SchemaCatalog>`.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    async fn connection(&self, connection_id: Uuid) -> Result<Connection, AppError>;

    /// Tables ordered by id, each with fields in stored order.
    async fn get_descriptions(&self, connection_id: Uuid) -> Result<Vec<TableSchema>, AppError>;

    /// Returns the connection that owns the table.
    async fn update_table_description(
        &self,
        table_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError>;

    /// Returns the connection that owns the field's table.
    async fn update_field_description(
        &self,
        field_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError>;

    /// Stores introspected tables with empty descriptions. Tables already
    /// present by name are left untouched. Returns how many were inserted.
    async fn store_introspected(
        &self,
        connection_id: Uuid,
        tables: &[IntrospectedTable],
    ) -> Result<usize, AppError>;

    async fn index_file(&self, connection_id: Uuid) -> Result<Option<String>, AppError>;

    async fn record_index(&self, connection_id: Uuid, index_file: &str) -> Result<(), AppError>;

    async fn clear_index(&self, connection_id: Uuid) -> Result<(), AppError>;
}
