use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

use crate::executor::ExecutionError;
use crate::models::connection::DialectKind;
use crate::models::schema::{IntrospectedColumn, IntrospectedTable};

/// One column of one table, as every dialect query below returns it.
#[derive(Debug, Clone, PartialEq)]
struct ColumnRow {
    table_name: String,
    column: IntrospectedColumn,
}

const POSTGRES_COLUMNS: &str = r#"
SELECT c.table_name::text AS table_name,
       c.column_name::text AS column_name,
       c.data_type::text AS data_type,
       CASE WHEN EXISTS (
           SELECT 1
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
           WHERE tc.constraint_type = 'PRIMARY KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
       ) THEN 1 ELSE 0 END::bigint AS is_primary_key,
       (
           SELECT ccu.table_name::text
           FROM information_schema.table_constraints tc
           JOIN information_schema.key_column_usage k
             ON k.constraint_name = tc.constraint_name
            AND k.table_schema = tc.table_schema
           JOIN information_schema.constraint_column_usage ccu
             ON ccu.constraint_name = tc.constraint_name
            AND ccu.constraint_schema = tc.constraint_schema
           WHERE tc.constraint_type = 'FOREIGN KEY'
             AND tc.table_schema = c.table_schema
             AND tc.table_name = c.table_name
             AND k.column_name = c.column_name
           LIMIT 1
       ) AS foreign_table
FROM information_schema.columns c
JOIN information_schema.tables t
  ON t.table_schema = c.table_schema
 AND t.table_name = c.table_name
WHERE c.table_schema = current_schema()
  AND t.table_type = 'BASE TABLE'
ORDER BY c.table_name, c.ordinal_position
"#;

const MYSQL_COLUMNS: &str = r#"
SELECT CAST(c.TABLE_NAME AS CHAR) AS table_name,
       CAST(c.COLUMN_NAME AS CHAR) AS column_name,
       CAST(c.DATA_TYPE AS CHAR) AS data_type,
       CAST(c.COLUMN_KEY = 'PRI' AS SIGNED) AS is_primary_key,
       (
           SELECT CAST(k.REFERENCED_TABLE_NAME AS CHAR)
           FROM information_schema.KEY_COLUMN_USAGE k
           WHERE k.TABLE_SCHEMA = c.TABLE_SCHEMA
             AND k.TABLE_NAME = c.TABLE_NAME
             AND k.COLUMN_NAME = c.COLUMN_NAME
             AND k.REFERENCED_TABLE_NAME IS NOT NULL
           LIMIT 1
       ) AS foreign_table
FROM information_schema.COLUMNS c
JOIN information_schema.TABLES t
  ON t.TABLE_SCHEMA = c.TABLE_SCHEMA
 AND t.TABLE_NAME = c.TABLE_NAME
WHERE c.TABLE_SCHEMA = DATABASE()
  AND t.TABLE_TYPE = 'BASE TABLE'
ORDER BY c.TABLE_NAME, c.ORDINAL_POSITION
"#;

const SQLITE_COLUMNS: &str = r#"
SELECT m.name AS table_name,
       p.name AS column_name,
       p.type AS data_type,
       CASE WHEN p.pk > 0 THEN 1 ELSE 0 END AS is_primary_key,
       (
           SELECT f."table"
           FROM pragma_foreign_key_list(m.name) f
           WHERE f."from" = p.name
           LIMIT 1
       ) AS foreign_table
FROM sqlite_master m
JOIN pragma_table_info(m.name) p
WHERE m.type = 'table'
  AND m.name NOT LIKE 'sqlite_%'
ORDER BY m.name, p.cid
"#;

/// Reads every base table in the connection's default schema.
pub async fn read_tables(
    pool: &AnyPool,
    dialect: DialectKind,
) -> Result<Vec<IntrospectedTable>, ExecutionError> {
    let sql = match dialect {
        DialectKind::Postgres => POSTGRES_COLUMNS,
        DialectKind::MySql => MYSQL_COLUMNS,
        DialectKind::Sqlite => SQLITE_COLUMNS,
        DialectKind::Unsupported => {
            return Err(ExecutionError::new(
                "Schema introspection is not supported for this dialect",
            ))
        }
    };

    let rows = sqlx::query(sql).fetch_all(pool).await?;
    let columns = rows
        .iter()
        .map(column_row)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(group_columns(columns))
}

fn column_row(row: &AnyRow) -> Result<ColumnRow, ExecutionError> {
    let foreign_table: Option<String> = row.try_get("foreign_table")?;
    Ok(ColumnRow {
        table_name: row.try_get("table_name")?,
        column: IntrospectedColumn {
            name: row.try_get("column_name")?,
            data_type: row
                .try_get::<Option<String>, _>("data_type")?
                .unwrap_or_default()
                .to_lowercase(),
            is_primary_key: row.try_get::<i64, _>("is_primary_key")? != 0,
            foreign_table: foreign_table.filter(|t| !t.is_empty()),
        },
    })
}

/// Folds column rows (already sorted by table) into tables, keeping order.
fn group_columns(rows: Vec<ColumnRow>) -> Vec<IntrospectedTable> {
    let mut tables: Vec<IntrospectedTable> = Vec::new();
    for row in rows {
        match tables.last_mut() {
            Some(table) if table.name == row.table_name => table.columns.push(row.column),
            _ => tables.push(IntrospectedTable {
                name: row.table_name,
                columns: vec![row.column],
            }),
        }
    }
    tables
}
