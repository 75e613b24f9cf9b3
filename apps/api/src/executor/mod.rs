//! Query execution against a connection's target database.
//!
//! `validator` rejects anything that is not a single read-only query before
//! it reaches a database; `database` runs what passes and decodes rows into
//! JSON values; `introspect` reads table/column metadata for the catalog.

pub mod database;
pub mod introspect;
pub mod validator;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::connection::Connection;
use crate::models::schema::IntrospectedTable;

pub use database::TargetDatabases;
pub use validator::validate_and_execute;

/// Why a generated query could not be run. The message is fed back to the
/// agent verbatim on the correction attempt and shown to the user if that
/// fails too.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<sqlx::Error> for ExecutionError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db) => ExecutionError::new(db.message()),
            None => ExecutionError::new(err.to_string()),
        }
    }
}

/// Column names plus rows, each row a list of values in column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Runs SQL and reads schema metadata on a connection's own database.
///
/// Carried in `AppState` as `Arc<dyn QueryExecutor>`.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executes the statement text returned by `validator::check_read_only`.
    async fn execute(&self, connection: &Connection, sql: &str)
        -> Result<QueryRows, ExecutionError>;

    async fn introspect(
        &self,
        connection: &Connection,
    ) -> Result<Vec<IntrospectedTable>, ExecutionError>;
}
