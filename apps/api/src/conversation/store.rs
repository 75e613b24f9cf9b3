use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use crate::conversation::ConversationStore;
use crate::errors::{map_db_error, AppError};
use crate::models::conversation::{
    Conversation, HistoryEntry, Message, MessageWithResults, ResultRecord, ResultType, Role,
    UnsavedResult,
};

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    conversation_id: i64,
    content: String,
    role: String,
    created_at: DateTime<Utc>,
    selected_tables: Vec<String>,
}

#[derive(Debug, FromRow)]
struct ResultRow {
    id: i64,
    message_id: i64,
    content: String,
    #[sqlx(rename = "type")]
    result_type: String,
    created_at: DateTime<Utc>,
    is_saved: bool,
}

#[derive(Debug, FromRow)]
struct HistoryRow {
    role: String,
    content: String,
    selected_tables: Vec<String>,
    sql: Option<String>,
}

fn parse_role(raw: &str) -> Result<Role, AppError> {
    Role::parse(raw).ok_or_else(|| AppError::Internal(anyhow!("unknown message role '{raw}'")))
}

impl TryFrom<MessageRow> for Message {
    type Error = AppError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        Ok(Message {
            id: row.id,
            conversation_id: row.conversation_id,
            content: row.content,
            role: parse_role(&row.role)?,
            created_at: row.created_at,
            selected_tables: row.selected_tables,
        })
    }
}

impl TryFrom<ResultRow> for ResultRecord {
    type Error = AppError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let result_type = ResultType::parse(&row.result_type).ok_or_else(|| {
            AppError::Internal(anyhow!("unknown result type '{}'", row.result_type))
        })?;
        Ok(ResultRecord {
            id: row.id,
            message_id: row.message_id,
            content: row.content,
            result_type,
            created_at: row.created_at,
            is_saved: row.is_saved,
        })
    }
}

const MESSAGE_COLUMNS: &str = "id, conversation_id, content, role, created_at, selected_tables";
const RESULT_COLUMNS: &str = "id, message_id, content, type, created_at, is_saved";

/// PostgreSQL-backed conversation store.
#[derive(Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Locks the conversation row for the rest of the transaction, so appends
    /// to one conversation land one after another.
    async fn lock_conversation(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: i64,
    ) -> Result<(), AppError> {
        sqlx::query_scalar::<_, i64>("SELECT id FROM conversations WHERE id = $1 FOR UPDATE")
            .bind(conversation_id)
            .fetch_optional(&mut **tx)
            .await?
            .map(|_| ())
            .ok_or_else(|| AppError::NotFound(format!("Conversation {conversation_id} not found")))
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        conversation_id: i64,
        role: Role,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        sqlx::query_as::<_, MessageRow>(&format!(
            "INSERT INTO messages (conversation_id, content, role, selected_tables) \
             VALUES ($1, $2, $3, $4) RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(conversation_id)
        .bind(content)
        .bind(role.as_str())
        .bind(selected_tables)
        .fetch_one(&mut **tx)
        .await
        .map_err(|e| map_db_error(e, "message"))?
        .try_into()
    }

    async fn insert_results(
        tx: &mut Transaction<'_, Postgres>,
        message_id: i64,
        results: &[UnsavedResult],
    ) -> Result<Vec<ResultRecord>, AppError> {
        let mut records = Vec::with_capacity(results.len());
        for result in results {
            let row = sqlx::query_as::<_, ResultRow>(&format!(
                "INSERT INTO results (message_id, content, type) \
                 VALUES ($1, $2, $3) RETURNING {RESULT_COLUMNS}"
            ))
            .bind(message_id)
            .bind(&result.content)
            .bind(result.result_type.as_str())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| map_db_error(e, "result"))?;
            records.push(row.try_into()?);
        }
        Ok(records)
    }

    async fn append_message(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, conversation_id).await?;
        let message =
            Self::insert_message(&mut tx, conversation_id, role, content, selected_tables).await?;
        tx.commit().await?;
        Ok(message)
    }

    async fn ensure_conversation(&self, conversation_id: i64) -> Result<(), AppError> {
        self.conversation(conversation_id).await.map(|_| ())
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn create_conversation(
        &self,
        connection_id: Uuid,
        name: &str,
    ) -> Result<Conversation, AppError> {
        let conversation = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (connection_id, name)
            VALUES ($1, $2)
            RETURNING id, connection_id, name, created_at
            "#,
        )
        .bind(connection_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_db_error(e, &format!("Connection {connection_id}")))?;

        info!(
            "Created conversation {} on connection {connection_id}",
            conversation.id
        );
        Ok(conversation)
    }

    async fn conversation(&self, conversation_id: i64) -> Result<Conversation, AppError> {
        sqlx::query_as::<_, Conversation>(
            "SELECT id, connection_id, name, created_at FROM conversations WHERE id = $1",
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Conversation {conversation_id} not found")))
    }

    async fn delete_conversation(&self, conversation_id: i64) -> Result<(), AppError> {
        // messages and results go with it (ON DELETE CASCADE)
        let deleted = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if deleted == 0 {
            return Err(AppError::NotFound(format!(
                "Conversation {conversation_id} not found"
            )));
        }
        info!("Deleted conversation {conversation_id}");
        Ok(())
    }

    async fn append_turn(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        self.append_message(conversation_id, Role::User, content, selected_tables)
            .await
    }

    async fn append_answer(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
        results: &[UnsavedResult],
    ) -> Result<MessageWithResults, AppError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_conversation(&mut tx, conversation_id).await?;
        let message = Self::insert_message(
            &mut tx,
            conversation_id,
            Role::Assistant,
            content,
            selected_tables,
        )
        .await?;
        let results = Self::insert_results(&mut tx, message.id, results).await?;
        tx.commit().await?;
        Ok(MessageWithResults { message, results })
    }

    async fn append_reply(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        self.append_message(conversation_id, Role::Assistant, content, selected_tables)
            .await
    }

    async fn append_results(
        &self,
        message_id: i64,
        results: &[UnsavedResult],
    ) -> Result<Vec<ResultRecord>, AppError> {
        let mut tx = self.pool.begin().await?;

        let role: String = sqlx::query_scalar("SELECT role FROM messages WHERE id = $1")
            .bind(message_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Message {message_id} not found")))?;
        if parse_role(&role)? != Role::Assistant {
            return Err(AppError::Validation(format!(
                "Message {message_id} is a user message and cannot carry results"
            )));
        }

        let records = Self::insert_results(&mut tx, message_id, results).await?;
        tx.commit().await?;
        Ok(records)
    }

    async fn history(&self, conversation_id: i64) -> Result<Vec<HistoryEntry>, AppError> {
        self.ensure_conversation(conversation_id).await?;

        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT m.role, m.content, m.selected_tables,
                   (SELECT r.content FROM results r
                    WHERE r.message_id = m.id AND r.type = 'sql'
                    ORDER BY r.id DESC
                    LIMIT 1) AS sql
            FROM messages m
            WHERE m.conversation_id = $1
            ORDER BY m.created_at, m.id
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(HistoryEntry {
                    role: parse_role(&row.role)?,
                    content: row.content,
                    sql: row.sql,
                    selected_tables: row.selected_tables,
                })
            })
            .collect()
    }

    async fn messages(&self, conversation_id: i64) -> Result<Vec<MessageWithResults>, AppError> {
        self.ensure_conversation(conversation_id).await?;

        let messages = sqlx::query_as::<_, MessageRow>(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE conversation_id = $1 \
             ORDER BY created_at, id"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;

        let message_ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        let results = sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE message_id = ANY($1) ORDER BY id"
        ))
        .bind(&message_ids)
        .fetch_all(&self.pool)
        .await?;

        let results = results
            .into_iter()
            .map(ResultRecord::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let messages = messages
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(attach_results(messages, results))
    }

    async fn result(&self, result_id: i64) -> Result<ResultRecord, AppError> {
        sqlx::query_as::<_, ResultRow>(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE id = $1"
        ))
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?
        .try_into()
    }

    async fn toggle_saved(&self, result_id: i64) -> Result<bool, AppError> {
        sqlx::query_scalar::<_, bool>(
            "UPDATE results SET is_saved = NOT is_saved WHERE id = $1 RETURNING is_saved",
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))
    }
}

/// Groups results (in id order) under their messages.
pub fn attach_results(
    messages: Vec<Message>,
    results: Vec<ResultRecord>,
) -> Vec<MessageWithResults> {
    let mut grouped: Vec<MessageWithResults> = messages
        .into_iter()
        .map(|message| MessageWithResults {
            message,
            results: Vec::new(),
        })
        .collect();

    for result in results {
        if let Some(entry) = grouped
            .iter_mut()
            .find(|m| m.message.id == result.message_id)
        {
            entry.results.push(result);
        }
    }
    grouped
}
