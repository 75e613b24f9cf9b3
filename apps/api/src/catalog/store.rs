use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::catalog::SchemaCatalog;
use crate::errors::{map_db_error, AppError};
use crate::models::connection::Connection;
use crate::models::schema::{IntrospectedTable, SchemaFieldRow, SchemaTableRow, TableSchema};

/// PostgreSQL-backed schema catalog.
#[derive(Clone)]
pub struct PgSchemaCatalog {
    pool: PgPool,
}

impl PgSchemaCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaCatalog for PgSchemaCatalog {
    async fn connection(&self, connection_id: Uuid) -> Result<Connection, AppError> {
        sqlx::query_as::<_, Connection>(
            "SELECT id, dsn, database, name, dialect FROM connections WHERE id = $1",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Connection {connection_id} not found")))
    }

    async fn get_descriptions(&self, connection_id: Uuid) -> Result<Vec<TableSchema>, AppError> {
        let tables = sqlx::query_as::<_, SchemaTableRow>(
            "SELECT id, connection_id, name, description FROM schema_tables WHERE connection_id = $1 ORDER BY id",
        )
        .bind(connection_id)
        .fetch_all(&self.pool)
        .await?;

        if tables.is_empty() {
            return Ok(Vec::new());
        }

        let table_ids: Vec<Uuid> = tables.iter().map(|t| t.id).collect();
        let fields = sqlx::query_as::<_, SchemaFieldRow>(
            r#"
            SELECT id, table_id, name, type, description, is_primary_key,
                   is_foreign_key, foreign_table, position
            FROM schema_fields
            WHERE table_id = ANY($1)
            ORDER BY table_id, position, id
            "#,
        )
        .bind(&table_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(assemble_tables(tables, fields))
    }

    async fn update_table_description(
        &self,
        table_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            "UPDATE schema_tables SET description = $1 WHERE id = $2 RETURNING connection_id",
        )
        .bind(description)
        .bind(table_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Schema table {table_id} not found")))
    }

    async fn update_field_description(
        &self,
        field_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE schema_fields f SET description = $1
            FROM schema_tables t
            WHERE f.id = $2 AND t.id = f.table_id
            RETURNING t.connection_id
            "#,
        )
        .bind(description)
        .bind(field_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Schema field {field_id} not found")))
    }

    async fn store_introspected(
        &self,
        connection_id: Uuid,
        tables: &[IntrospectedTable],
    ) -> Result<usize, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for table in tables {
            let table_id: Option<Uuid> = sqlx::query_scalar(
                r#"
                INSERT INTO schema_tables (id, connection_id, name, description)
                VALUES ($1, $2, $3, '')
                ON CONFLICT (connection_id, name) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(connection_id)
            .bind(&table.name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_db_error(e, "schema table"))?;

            // Existing table: descriptions were possibly edited, keep it as is.
            let Some(table_id) = table_id else {
                continue;
            };
            inserted += 1;

            for (position, column) in table.columns.iter().enumerate() {
                sqlx::query(
                    r#"
                    INSERT INTO schema_fields
                        (id, table_id, name, type, description, is_primary_key,
                         is_foreign_key, foreign_table, position)
                    VALUES ($1, $2, $3, $4, '', $5, $6, $7, $8)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(table_id)
                .bind(&column.name)
                .bind(&column.data_type)
                .bind(column.is_primary_key)
                .bind(column.foreign_table.is_some())
                .bind(column.foreign_table.as_deref().unwrap_or(""))
                .bind(position as i32)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_db_error(e, "schema field"))?;
            }
        }

        tx.commit().await?;
        info!("Stored {inserted} introspected tables for connection {connection_id}");
        Ok(inserted)
    }

    async fn index_file(&self, connection_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(sqlx::query_scalar(
            "SELECT index_file FROM schema_indexes WHERE connection_id = $1",
        )
        .bind(connection_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn record_index(&self, connection_id: Uuid, index_file: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO schema_indexes (connection_id, index_file)
            VALUES ($1, $2)
            ON CONFLICT (connection_id)
            DO UPDATE SET index_file = EXCLUDED.index_file, created_at = now()
            "#,
        )
        .bind(connection_id)
        .bind(index_file)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_error(e, "schema index"))?;
        Ok(())
    }

    async fn clear_index(&self, connection_id: Uuid) -> Result<(), AppError> {
        sqlx::query("DELETE FROM schema_indexes WHERE connection_id = $1")
            .bind(connection_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Nests fields under their tables, keeping table order and each table's
/// field order as given.
pub fn assemble_tables(tables: Vec<SchemaTableRow>, fields: Vec<SchemaFieldRow>) -> Vec<TableSchema> {
    let mut schemas: Vec<TableSchema> = tables
        .into_iter()
        .map(|t| TableSchema {
            id: t.id,
            connection_id: t.connection_id,
            name: t.name,
            description: t.description,
            fields: Vec::new(),
        })
        .collect();

    for field in fields {
        if let Some(table) = schemas.iter_mut().find(|t| t.id == field.table_id) {
            table.fields.push(field);
        }
    }
    for table in &mut schemas {
        table.fields.sort_by_key(|f| f.position);
    }
    schemas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_tables_nests_fields_in_position_order() {
        let connection_id = Uuid::new_v4();
        let customers = SchemaTableRow {
            id: Uuid::new_v4(),
            connection_id,
            name: "customers".to_string(),
            description: String::new(),
        };
        let field = |name: &str, position: i32| SchemaFieldRow {
            id: Uuid::new_v4(),
            table_id: customers.id,
            name: name.to_string(),
            field_type: "text".to_string(),
            description: String::new(),
            is_primary_key: false,
            is_foreign_key: false,
            foreign_table: String::new(),
            position,
        };
        let orphan = SchemaFieldRow {
            table_id: Uuid::new_v4(),
            ..field("ghost", 0)
        };

        let tables = assemble_tables(
            vec![customers.clone()],
            vec![field("name", 1), orphan, field("id", 0)],
        );

        assert_eq!(tables.len(), 1);
        let names: Vec<_> = tables[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
    }
}
