use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Sql,
    Text,
    Code,
}

impl ResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultType::Sql => "sql",
            ResultType::Text => "text",
            ResultType::Code => "code",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "sql" => Some(ResultType::Sql),
            "text" => Some(ResultType::Text),
            "code" => Some(ResultType::Code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Conversation {
    pub id: i64,
    pub connection_id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub content: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    /// Tables the relevance index picked for this turn, kept for audit/replay.
    pub selected_tables: Vec<String>,
}

/// A result that has not been written yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsavedResult {
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub content: String,
}

impl UnsavedResult {
    pub fn new(result_type: ResultType, content: impl Into<String>) -> Self {
        Self {
            result_type,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: i64,
    pub message_id: i64,
    pub content: String,
    #[serde(rename = "type")]
    pub result_type: ResultType,
    pub created_at: DateTime<Utc>,
    pub is_saved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageWithResults {
    #[serde(flatten)]
    pub message: Message,
    pub results: Vec<ResultRecord>,
}

/// One prior turn as the agent sees it. `sql` is the latest SQL result the
/// message carries, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub sql: Option<String>,
    pub selected_tables: Vec<String>,
}
