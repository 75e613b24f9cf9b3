use std::ops::ControlFlow;

use sqlparser::ast::{Query, SetExpr, Statement, Visit, Visitor};
use sqlparser::dialect::dialect_from_str;
use sqlparser::parser::Parser;
use tracing::{debug, warn};

use crate::executor::{ExecutionError, QueryExecutor, QueryRows};
use crate::models::connection::{Connection, DialectKind};

/// Accepts exactly one statement, and only if it is a query that cannot
/// write: no `SELECT ... INTO`, no row locks, no data-modifying bodies, at any
/// nesting depth.
///
/// Returns the statement as re-rendered by the parser, without comments or a
/// trailing semicolon. That text is what gets executed.
pub fn check_read_only(sql: &str, dialect: DialectKind) -> Result<String, ExecutionError> {
    let parser_dialect = dialect_from_str(dialect.parser_name())
        .ok_or_else(|| ExecutionError::new(format!("Unsupported dialect: {dialect:?}")))?;

    let statements = Parser::parse_sql(parser_dialect.as_ref(), sql)
        .map_err(|e| ExecutionError::new(format!("SQL could not be parsed: {e}")))?;

    let statement = match statements.as_slice() {
        [] => return Err(ExecutionError::new("No SQL statement was provided")),
        [statement] => statement,
        _ => {
            return Err(ExecutionError::new(
                "Only a single SQL statement can be executed",
            ))
        }
    };

    if !matches!(statement, Statement::Query(_)) {
        return Err(ExecutionError::new(format!(
            "Only read-only SELECT queries are allowed, got: {}",
            statement_kind(statement)
        )));
    }

    match statement.visit(&mut ReadOnlyQueries) {
        ControlFlow::Break(err) => Err(err),
        ControlFlow::Continue(()) => Ok(statement.to_string()),
    }
}

/// Visits every query in the tree: CTEs, derived tables and subqueries in
/// expressions included.
struct ReadOnlyQueries;

impl Visitor for ReadOnlyQueries {
    type Break = ExecutionError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<Self::Break> {
        match check_query(query) {
            Ok(()) => ControlFlow::Continue(()),
            Err(err) => ControlFlow::Break(err),
        }
    }
}

/// Checks one query level. Nested queries are reached by the visitor.
fn check_query(query: &Query) -> Result<(), ExecutionError> {
    if !query.locks.is_empty() {
        return Err(ExecutionError::new(
            "Row locking clauses (FOR UPDATE/FOR SHARE) are not allowed",
        ));
    }
    check_set_expr(&query.body)
}

fn check_set_expr(body: &SetExpr) -> Result<(), ExecutionError> {
    match body {
        SetExpr::Select(select) => {
            if select.into.is_some() {
                return Err(ExecutionError::new("SELECT ... INTO is not allowed"));
            }
            Ok(())
        }
        SetExpr::SetOperation { left, right, .. } => {
            check_set_expr(left)?;
            check_set_expr(right)
        }
        SetExpr::Insert(_) | SetExpr::Update(_) => Err(ExecutionError::new(
            "Data-modifying statements are not allowed",
        )),
        _ => Ok(()),
    }
}

fn statement_kind(statement: &Statement) -> String {
    // First two words of the rendered statement, e.g. "DROP TABLE"
    statement
        .to_string()
        .split_whitespace()
        .take(2)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Validates, then executes. A rejected statement never reaches the executor.
pub async fn validate_and_execute(
    executor: &dyn QueryExecutor,
    connection: &Connection,
    sql: &str,
) -> Result<QueryRows, ExecutionError> {
    let statement = match check_read_only(sql, connection.dialect_kind()) {
        Ok(statement) => statement,
        Err(err) => {
            warn!("Rejected SQL for connection {}: {}", connection.id, err);
            return Err(err);
        }
    };

    let rows = executor.execute(connection, &statement).await?;
    debug!(
        "Query on connection {} returned {} rows",
        connection.id,
        rows.rows.len()
    );
    Ok(rows)
}
