use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A registered target database. The DSN carries credentials and is never
/// serialized back out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Connection {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub dsn: String,
    pub database: String,
    pub name: String,
    pub dialect: String,
}

impl Connection {
    pub fn dialect_kind(&self) -> DialectKind {
        DialectKind::parse(&self.dialect)
    }
}

/// SQL dialects the executor and introspection know how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialectKind {
    Postgres,
    Sqlite,
    MySql,
    Unsupported,
}

impl DialectKind {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => DialectKind::Postgres,
            "sqlite" => DialectKind::Sqlite,
            "mysql" | "mariadb" => DialectKind::MySql,
            _ => DialectKind::Unsupported,
        }
    }

    /// Name understood by `sqlparser::dialect::dialect_from_str`.
    pub fn parser_name(&self) -> &'static str {
        match self {
            DialectKind::Postgres => "postgresql",
            DialectKind::Sqlite => "sqlite",
            DialectKind::MySql => "mysql",
            DialectKind::Unsupported => "generic",
        }
    }
}
