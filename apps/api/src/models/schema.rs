use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchemaTableRow {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SchemaFieldRow {
    pub id: Uuid,
    pub table_id: Uuid,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub field_type: String,
    pub description: String,
    pub is_primary_key: bool,
    pub is_foreign_key: bool,
    /// Empty when the field is not a foreign key.
    pub foreign_table: String,
    pub position: i32,
}

/// A table with its fields in stored (ordinal) order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub id: Uuid,
    pub connection_id: Uuid,
    pub name: String,
    pub description: String,
    pub fields: Vec<SchemaFieldRow>,
}

/// A column as reported by the live database, before it is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectedColumn {
    pub name: String,
    pub data_type: String,
    pub is_primary_key: bool,
    pub foreign_table: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntrospectedTable {
    pub name: String,
    pub columns: Vec<IntrospectedColumn>,
}
