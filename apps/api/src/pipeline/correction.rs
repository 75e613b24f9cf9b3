//! Self-correction: one attempt, and at most one re-ask when its SQL fails.

use serde::Serialize;
use tracing::{info, warn};

use crate::agent::{Correction, GenerationRequest, SqlAgent, StructuredResult};
use crate::errors::AppError;
use crate::executor::{validate_and_execute, ExecutionError, QueryExecutor, QueryRows};
use crate::models::connection::Connection;
use crate::models::conversation::{ResultType, UnsavedResult};

/// Where the loop stopped. `Reask` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Attempt1,
    Reask,
}

#[derive(Debug)]
pub struct Resolution {
    /// The answer that is persisted: the first one, or the re-ask's.
    pub response: StructuredResult,
    /// Outcome of running `response.sql`; `None` when there was no SQL.
    pub execution: Option<Result<QueryRows, ExecutionError>>,
    pub state: AttemptState,
}

impl Resolution {
    /// Results in persisted order: text, SQL, then the failure explanation
    /// if the final SQL did not run.
    pub fn results(&self) -> Vec<UnsavedResult> {
        let mut results = Vec::new();
        if let Some(text) = &self.response.text {
            results.push(UnsavedResult::new(ResultType::Text, text.clone()));
        }
        if let Some(sql) = &self.response.sql {
            results.push(UnsavedResult::new(ResultType::Sql, sql.clone()));
        }
        if let Some(Err(err)) = &self.execution {
            results.push(UnsavedResult::new(
                ResultType::Text,
                format!("The query could not be run even after a correction attempt: {err}"),
            ));
        }
        results
    }

    pub fn rows(&self) -> Option<&QueryRows> {
        self.execution.as_ref().and_then(|e| e.as_ref().ok())
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        self.execution.as_ref().and_then(|e| e.as_ref().err())
    }
}

/// Runs the agent, executes its SQL, and re-asks once with the failure if the
/// SQL does not validate or execute. The agent is called at most twice.
pub async fn resolve(
    agent: &dyn SqlAgent,
    executor: &dyn QueryExecutor,
    connection: &Connection,
    request: GenerationRequest<'_>,
) -> Result<Resolution, AppError> {
    let first = agent.generate(&request).await?;

    let Some(sql) = first.sql.clone() else {
        return Ok(Resolution {
            response: first,
            execution: None,
            state: AttemptState::Attempt1,
        });
    };

    let error = match validate_and_execute(executor, connection, &sql).await {
        Ok(rows) => {
            return Ok(Resolution {
                response: first,
                execution: Some(Ok(rows)),
                state: AttemptState::Attempt1,
            })
        }
        Err(err) => err,
    };

    warn!("First attempt failed, re-asking: {error}");
    let correction = Correction {
        failed_sql: sql,
        error: error.message,
    };
    let second = agent
        .generate(&GenerationRequest {
            correction: Some(&correction),
            ..request
        })
        .await?;

    let execution = match second.sql.as_deref() {
        Some(sql) => Some(validate_and_execute(executor, connection, sql).await),
        None => None,
    };
    match &execution {
        Some(Err(err)) => warn!("Corrected query failed as well: {err}"),
        _ => info!("Re-ask produced a usable answer"),
    }

    Ok(Resolution {
        response: second,
        execution,
        state: AttemptState::Reask,
    })
}
