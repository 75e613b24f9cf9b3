use async_trait::async_trait;
use tracing::{debug, info};

use crate::agent::prompts::{CORRECTION_PROMPT, SYSTEM_PROMPT};
use crate::agent::response::{final_response_tool, StructuredResult};
use crate::errors::AppError;
use crate::llm_client::{ChatMessage, ChatRole, LlmClient, LlmError};
use crate::models::conversation::{HistoryEntry, Role};

/// The failed SQL and the reason it failed, fed back on the correction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    pub failed_sql: String,
    pub error: String,
}

/// Everything one agent attempt needs.
#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub dialect: &'a str,
    pub question: &'a str,
    /// Relevant-table context from the schema index.
    pub context: &'a str,
    /// Prior turns, oldest first, without the current question.
    pub history: &'a [HistoryEntry],
    pub correction: Option<&'a Correction>,
}

/// Produces a structured answer for a question. One call is one model round trip.
///
/// Carried in `QueryPipeline` as `Arc<dyn SqlAgent>`.
#[async_trait]
pub trait SqlAgent: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>)
        -> Result<StructuredResult, AppError>;
}

/// Claude-backed agent. The final answer is forced through the
/// `prepare_final_response` tool.
pub struct LlmSqlAgent {
    llm: LlmClient,
    result_limit: u32,
}

impl LlmSqlAgent {
    pub fn new(llm: LlmClient, result_limit: u32) -> Self {
        Self { llm, result_limit }
    }
}

#[async_trait]
impl SqlAgent for LlmSqlAgent {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<StructuredResult, AppError> {
        let system = build_system_prompt(request.dialect, self.result_limit, request.context);
        let messages = build_messages(request.history, request.question, request.correction);
        let tool = final_response_tool();

        info!(
            "Generating answer ({} history turns, correction: {})",
            request.history.len(),
            request.correction.is_some()
        );

        let result: StructuredResult = self
            .llm
            .call_tool(&system, &messages, &tool)
            .await
            .map_err(|e| match e {
                LlmError::MissingToolCall(_) | LlmError::Parse(_) => {
                    AppError::Generation(e.to_string())
                }
                other => AppError::Llm(other.to_string()),
            })?;

        debug!(
            "Agent answered: success={}, sql={}",
            result.success,
            result.sql.is_some()
        );
        result.into_checked()
    }
}

pub fn build_system_prompt(dialect: &str, limit: u32, context: &str) -> String {
    SYSTEM_PROMPT
        .replace("{dialect}", dialect)
        .replace("{limit}", &limit.to_string())
        .replace("{context}", context.trim())
}

/// Replays history as alternating turns and appends the question.
///
/// Assistant turns carry their SQL inline. Consecutive turns with the same
/// role (e.g. a user message whose answer failed) are merged, and leading
/// assistant turns are dropped since the conversation must open with the user.
pub fn build_messages(
    history: &[HistoryEntry],
    question: &str,
    correction: Option<&Correction>,
) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = Vec::with_capacity(history.len() + 1);

    for entry in history {
        let (role, content) = match entry.role {
            Role::User => (ChatRole::User, entry.content.trim().to_string()),
            Role::Assistant => (ChatRole::Assistant, assistant_turn(entry)),
        };
        if content.is_empty() || (messages.is_empty() && role == ChatRole::Assistant) {
            continue;
        }
        push_merged(&mut messages, role, content);
    }

    let final_turn = match correction {
        Some(correction) => CORRECTION_PROMPT
            .replace("{sql}", &correction.failed_sql)
            .replace("{error}", &correction.error)
            .replace("{question}", question),
        None => question.to_string(),
    };
    push_merged(&mut messages, ChatRole::User, final_turn);
    messages
}

fn assistant_turn(entry: &HistoryEntry) -> String {
    let text = entry.content.trim();
    match entry.sql.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(sql) if text.is_empty() => format!("SQL:\n{sql}"),
        Some(sql) => format!("{text}\n\nSQL:\n{sql}"),
        None => text.to_string(),
    }
}

fn push_merged(messages: &mut Vec<ChatMessage>, role: ChatRole, content: String) {
    match messages.last_mut() {
        Some(last) if last.role == role => {
            last.content.push_str("\n\n");
            last.content.push_str(&content);
        }
        _ => messages.push(ChatMessage { role, content }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(role: Role, content: &str, sql: Option<&str>) -> HistoryEntry {
        HistoryEntry {
            role,
            content: content.to_string(),
            sql: sql.map(str::to_string),
            selected_tables: Vec::new(),
        }
    }

    #[test]
    fn test_system_prompt_interpolates_dialect_limit_and_context() {
        let prompt = build_system_prompt("postgresql", 10, "Table: customers\n");
        assert!(prompt.contains("a postgresql database"));
        assert!(prompt.contains("at most 10 results"));
        assert!(prompt.ends_with("Table: customers"));
        assert!(!prompt.contains('{'));
    }

    #[test]
    fn test_history_alternates_with_sql_inline() {
        let history = vec![
            entry(Role::User, "How many customers?", None),
            entry(
                Role::Assistant,
                "There are 3 customers.",
                Some("SELECT COUNT(*) FROM customers"),
            ),
        ];
        let messages = build_messages(&history, "And orders?", None);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], ChatMessage::user("How many customers?"));
        assert_eq!(
            messages[1],
            ChatMessage::assistant("There are 3 customers.\n\nSQL:\nSELECT COUNT(*) FROM customers")
        );
        assert_eq!(messages[2], ChatMessage::user("And orders?"));
    }

    #[test]
    fn test_unanswered_user_turn_merges_with_question() {
        let history = vec![entry(Role::User, "Revenue by month?", None)];
        let messages = build_messages(&history, "Revenue by week?", None);

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Revenue by month?\n\nRevenue by week?");
    }

    #[test]
    fn test_leading_assistant_turn_is_dropped() {
        let history = vec![entry(Role::Assistant, "Hello", None)];
        let messages = build_messages(&history, "Hi", None);
        assert_eq!(messages, vec![ChatMessage::user("Hi")]);
    }

    #[test]
    fn test_correction_carries_failed_sql_and_error() {
        let correction = Correction {
            failed_sql: "SELECT * FROM custmers".to_string(),
            error: "relation \"custmers\" does not exist".to_string(),
        };
        let messages = build_messages(&[], "How many customers?", Some(&correction));

        assert_eq!(messages.len(), 1);
        let turn = &messages[0].content;
        assert!(turn.starts_with("How many customers?"));
        assert!(turn.contains("failed with:\nrelation \"custmers\" does not exist"));
        assert!(turn.contains("SELECT * FROM custmers"));
    }
}
