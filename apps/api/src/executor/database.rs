use std::collections::HashMap;
use std::time::Duration;

use std::fmt;

use async_trait::async_trait;
use serde::de::{Deserialize, Deserializer, MapAccess, Visitor};
use serde_json::Value;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Column, Row};
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use crate::executor::introspect;
use crate::executor::{ExecutionError, QueryExecutor, QueryRows};
use crate::models::connection::{Connection, DialectKind};
use crate::models::schema::IntrospectedTable;

/// Lazily opened pools to every target database, keyed by connection id.
pub struct TargetDatabases {
    pools: RwLock<HashMap<Uuid, AnyPool>>,
    timeout: Duration,
}

impl TargetDatabases {
    pub fn new(timeout: Duration) -> Self {
        sqlx::any::install_default_drivers();
        Self {
            pools: RwLock::new(HashMap::new()),
            timeout,
        }
    }

    async fn pool(&self, connection: &Connection) -> Result<AnyPool, ExecutionError> {
        if let Some(pool) = self.pools.read().await.get(&connection.id) {
            return Ok(pool.clone());
        }

        let mut pools = self.pools.write().await;
        if let Some(pool) = pools.get(&connection.id) {
            return Ok(pool.clone());
        }

        let pool = AnyPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect(&connection.dsn)
            .await?;
        info!(
            "Opened {} pool for connection {}",
            connection.dialect, connection.id
        );
        pools.insert(connection.id, pool.clone());
        Ok(pool)
    }

    async fn run(&self, connection: &Connection, sql: &str) -> Result<QueryRows, ExecutionError> {
        let pool = self.pool(connection).await?;
        let sql = sql.trim().trim_end_matches(';');

        match connection.dialect_kind() {
            DialectKind::Postgres => fetch_postgres(&pool, sql).await,
            DialectKind::Sqlite | DialectKind::MySql => {
                let rows = sqlx::query(sql).fetch_all(&pool).await?;
                Ok(decode_rows(&rows))
            }
            DialectKind::Unsupported => Err(ExecutionError::new(format!(
                "Unsupported dialect: {}",
                connection.dialect
            ))),
        }
    }
}

/// Postgres numerics and timestamps do not decode through the `Any` driver,
/// so each row is turned into JSON text server side. The transaction is
/// read only and always rolled back.
async fn fetch_postgres(pool: &AnyPool, sql: &str) -> Result<QueryRows, ExecutionError> {
    let mut tx = pool.begin().await?;
    sqlx::query("SET TRANSACTION READ ONLY")
        .execute(&mut *tx)
        .await?;

    let wrapped = format!("SELECT row_to_json(q)::text FROM ({sql}) AS q");
    let raw: Vec<String> = sqlx::query_scalar(&wrapped).fetch_all(&mut *tx).await?;
    tx.rollback().await?;

    rows_from_json(&raw)
}

/// A JSON object's entries in document order, duplicate keys included.
/// `SELECT c.id, o.id ...` yields `{"id":1,"id":7}` and both columns count.
struct RowEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RowEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RowEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RowEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(RowEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

fn rows_from_json(raw: &[String]) -> Result<QueryRows, ExecutionError> {
    let mut result = QueryRows::default();
    for (i, line) in raw.iter().enumerate() {
        let RowEntries(entries) = serde_json::from_str(line)
            .map_err(|e| ExecutionError::new(format!("Undecodable row: {e}")))?;
        if i == 0 {
            result.columns = entries.iter().map(|(name, _)| name.clone()).collect();
        }
        result.rows.push(entries.into_iter().map(|(_, value)| value).collect());
    }
    Ok(result)
}

fn decode_rows(rows: &[AnyRow]) -> QueryRows {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| decode_value(row, i)).collect())
        .collect();

    QueryRows { columns, rows }
}

fn decode_value(row: &AnyRow, index: usize) -> Value {
    if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(index) {
        return v.map(Value::from).unwrap_or(Value::Null);
    }
    Value::Null
}

#[async_trait]
impl QueryExecutor for TargetDatabases {
    async fn execute(
        &self,
        connection: &Connection,
        sql: &str,
    ) -> Result<QueryRows, ExecutionError> {
        tokio::time::timeout(self.timeout, self.run(connection, sql))
            .await
            .map_err(|_| {
                ExecutionError::new(format!(
                    "Query exceeded the {}s time limit",
                    self.timeout.as_secs()
                ))
            })?
    }

    async fn introspect(
        &self,
        connection: &Connection,
    ) -> Result<Vec<IntrospectedTable>, ExecutionError> {
        let pool = self.pool(connection).await?;
        introspect::read_tables(&pool, connection.dialect_kind()).await
    }
}
