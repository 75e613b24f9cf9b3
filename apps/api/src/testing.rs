//! In-memory implementations of the store, catalog, agent and executor
//! traits, plus the customers/orders fixture shared by the test modules.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;
use uuid::Uuid;

use crate::agent::{Correction, GenerationRequest, SqlAgent, StructuredResult};
use crate::catalog::SchemaCatalog;
use crate::conversation::ConversationStore;
use crate::errors::AppError;
use crate::executor::{ExecutionError, QueryExecutor, QueryRows};
use crate::models::connection::Connection;
use crate::models::conversation::{
    Conversation, HistoryEntry, Message, MessageWithResults, ResultRecord, ResultType, Role,
    UnsavedResult,
};
use crate::models::schema::{
    IntrospectedColumn, IntrospectedTable, SchemaFieldRow, TableSchema,
};
use crate::pipeline::QueryPipeline;
use crate::relevance::{HashingEmbedder, SchemaIndexRegistry};
use crate::state::AppState;

pub const SHOP_CONNECTION: Uuid = Uuid::from_u128(0x5a0b_0000_0000_0000_0000_0000_0000_0001);
const CUSTOMERS_TABLE: Uuid = Uuid::from_u128(0x7ab1_0000_0000_0000_0000_0000_0000_0001);
const ORDERS_TABLE: Uuid = Uuid::from_u128(0x7ab1_0000_0000_0000_0000_0000_0000_0002);

pub fn shop_connection() -> Connection {
    Connection {
        id: SHOP_CONNECTION,
        dsn: "postgres://localhost/shop".to_string(),
        database: "shop".to_string(),
        name: "Shop".to_string(),
        dialect: "postgresql".to_string(),
    }
}

fn field(table_id: Uuid, name: &str, ty: &str, position: i32, fk: &str) -> SchemaFieldRow {
    SchemaFieldRow {
        id: Uuid::new_v4(),
        table_id,
        name: name.to_string(),
        field_type: ty.to_string(),
        description: String::new(),
        is_primary_key: name == "id",
        is_foreign_key: !fk.is_empty(),
        foreign_table: fk.to_string(),
        position,
    }
}

/// `customers(id, name)` and `orders(id, customer_id -> customers, total)`,
/// without descriptions.
pub fn customers_and_orders() -> Vec<TableSchema> {
    vec![
        TableSchema {
            id: CUSTOMERS_TABLE,
            connection_id: SHOP_CONNECTION,
            name: "customers".to_string(),
            description: String::new(),
            fields: vec![
                field(CUSTOMERS_TABLE, "id", "integer", 0, ""),
                field(CUSTOMERS_TABLE, "name", "text", 1, ""),
            ],
        },
        TableSchema {
            id: ORDERS_TABLE,
            connection_id: SHOP_CONNECTION,
            name: "orders".to_string(),
            description: String::new(),
            fields: vec![
                field(ORDERS_TABLE, "id", "integer", 0, ""),
                field(ORDERS_TABLE, "customer_id", "integer", 1, "customers"),
                field(ORDERS_TABLE, "total", "numeric", 2, ""),
            ],
        },
    ]
}

fn shop_introspection() -> Vec<IntrospectedTable> {
    customers_and_orders()
        .into_iter()
        .map(|table| IntrospectedTable {
            name: table.name,
            columns: table
                .fields
                .into_iter()
                .map(|f| IntrospectedColumn {
                    name: f.name,
                    data_type: f.field_type,
                    is_primary_key: f.is_primary_key,
                    foreign_table: Some(f.foreign_table).filter(|t| !t.is_empty()),
                })
                .collect(),
        })
        .collect()
}

pub fn answer(text: &str, sql: Option<&str>) -> StructuredResult {
    StructuredResult {
        success: true,
        text: Some(text.to_string()),
        sql: sql.map(str::to_string),
        chart_request: None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Catalog
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCatalog {
    connections: Mutex<HashMap<Uuid, Connection>>,
    tables: Mutex<Vec<TableSchema>>,
    indexes: Mutex<HashMap<Uuid, String>>,
}

impl MemoryCatalog {
    /// The shop connection with no stored tables.
    pub fn empty() -> Self {
        let catalog = Self::default();
        catalog
            .connections
            .lock()
            .unwrap()
            .insert(SHOP_CONNECTION, shop_connection());
        catalog
    }

    pub fn shop() -> Self {
        let catalog = Self::empty();
        *catalog.tables.lock().unwrap() = customers_and_orders();
        catalog
    }

    pub fn clear_tables(&self) {
        self.tables.lock().unwrap().clear();
    }
}

#[async_trait]
impl SchemaCatalog for MemoryCatalog {
    async fn connection(&self, connection_id: Uuid) -> Result<Connection, AppError> {
        self.connections
            .lock()
            .unwrap()
            .get(&connection_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Connection {connection_id} not found")))
    }

    async fn get_descriptions(&self, connection_id: Uuid) -> Result<Vec<TableSchema>, AppError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.connection_id == connection_id)
            .cloned()
            .collect())
    }

    async fn update_table_description(
        &self,
        table_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError> {
        let mut tables = self.tables.lock().unwrap();
        let table = tables
            .iter_mut()
            .find(|t| t.id == table_id)
            .ok_or_else(|| AppError::NotFound(format!("Schema table {table_id} not found")))?;
        table.description = description.to_string();
        Ok(table.connection_id)
    }

    async fn update_field_description(
        &self,
        field_id: Uuid,
        description: &str,
    ) -> Result<Uuid, AppError> {
        let mut tables = self.tables.lock().unwrap();
        for table in tables.iter_mut() {
            if let Some(field) = table.fields.iter_mut().find(|f| f.id == field_id) {
                field.description = description.to_string();
                return Ok(table.connection_id);
            }
        }
        Err(AppError::NotFound(format!("Schema field {field_id} not found")))
    }

    async fn store_introspected(
        &self,
        connection_id: Uuid,
        introspected: &[IntrospectedTable],
    ) -> Result<usize, AppError> {
        let mut tables = self.tables.lock().unwrap();
        let mut inserted = 0;
        for table in introspected {
            if tables
                .iter()
                .any(|t| t.connection_id == connection_id && t.name == table.name)
            {
                continue;
            }
            let table_id = Uuid::new_v4();
            tables.push(TableSchema {
                id: table_id,
                connection_id,
                name: table.name.clone(),
                description: String::new(),
                fields: table
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, c)| SchemaFieldRow {
                        is_primary_key: c.is_primary_key,
                        ..field(
                            table_id,
                            &c.name,
                            &c.data_type,
                            i as i32,
                            c.foreign_table.as_deref().unwrap_or(""),
                        )
                    })
                    .collect(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn index_file(&self, connection_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(self.indexes.lock().unwrap().get(&connection_id).cloned())
    }

    async fn record_index(&self, connection_id: Uuid, index_file: &str) -> Result<(), AppError> {
        self.indexes
            .lock()
            .unwrap()
            .insert(connection_id, index_file.to_string());
        Ok(())
    }

    async fn clear_index(&self, connection_id: Uuid) -> Result<(), AppError> {
        self.indexes.lock().unwrap().remove(&connection_id);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Conversation store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct StoreState {
    next_id: i64,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    results: Vec<ResultRecord>,
}

impl StoreState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn ensure_conversation(&self, conversation_id: i64) -> Result<(), AppError> {
        if self.conversations.iter().any(|c| c.id == conversation_id) {
            Ok(())
        } else {
            Err(AppError::NotFound(format!(
                "Conversation {conversation_id} not found"
            )))
        }
    }
}

#[derive(Default)]
pub struct MemoryConversationStore {
    state: Mutex<StoreState>,
    fail_answers: AtomicBool,
}

impl MemoryConversationStore {
    /// Every `append_answer` fails as if the pool had timed out.
    pub fn failing_answers() -> Self {
        Self {
            fail_answers: AtomicBool::new(true),
            ..Self::default()
        }
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().unwrap().messages.len()
    }

    pub fn result_count(&self) -> usize {
        self.state.lock().unwrap().results.len()
    }

    fn append(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_conversation(conversation_id)?;
        let message = Message {
            id: state.next_id(),
            conversation_id,
            content: content.to_string(),
            role,
            created_at: Utc::now(),
            selected_tables: selected_tables.to_vec(),
        };
        state.messages.push(message.clone());
        Ok(message)
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn create_conversation(
        &self,
        connection_id: Uuid,
        name: &str,
    ) -> Result<Conversation, AppError> {
        if connection_id != SHOP_CONNECTION {
            return Err(AppError::NotFound(format!(
                "Connection {connection_id}: referenced row does not exist"
            )));
        }
        let mut state = self.state.lock().unwrap();
        let conversation = Conversation {
            id: state.next_id(),
            connection_id,
            name: name.to_string(),
            created_at: Utc::now(),
        };
        state.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn conversation(&self, conversation_id: i64) -> Result<Conversation, AppError> {
        self.state
            .lock()
            .unwrap()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Conversation {conversation_id} not found")))
    }

    async fn delete_conversation(&self, conversation_id: i64) -> Result<(), AppError> {
        let mut state = self.state.lock().unwrap();
        state.ensure_conversation(conversation_id)?;

        let message_ids: Vec<i64> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.id)
            .collect();
        state.results.retain(|r| !message_ids.contains(&r.message_id));
        state
            .messages
            .retain(|m| m.conversation_id != conversation_id);
        state.conversations.retain(|c| c.id != conversation_id);
        Ok(())
    }

    async fn append_turn(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        self.append(conversation_id, Role::User, content, selected_tables)
    }

    async fn append_answer(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
        results: &[UnsavedResult],
    ) -> Result<MessageWithResults, AppError> {
        if self.fail_answers.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolTimedOut));
        }
        let message = self.append(conversation_id, Role::Assistant, content, selected_tables)?;
        let results = self.append_results(message.id, results).await?;
        Ok(MessageWithResults { message, results })
    }

    async fn append_reply(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError> {
        self.append(conversation_id, Role::Assistant, content, selected_tables)
    }

    async fn append_results(
        &self,
        message_id: i64,
        results: &[UnsavedResult],
    ) -> Result<Vec<ResultRecord>, AppError> {
        let mut state = self.state.lock().unwrap();
        let role = state
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .map(|m| m.role)
            .ok_or_else(|| AppError::NotFound(format!("Message {message_id} not found")))?;
        if role != Role::Assistant {
            return Err(AppError::Validation(format!(
                "Message {message_id} is a user message and cannot carry results"
            )));
        }

        let mut records = Vec::new();
        for result in results {
            let record = ResultRecord {
                id: state.next_id(),
                message_id,
                content: result.content.clone(),
                result_type: result.result_type,
                created_at: Utc::now(),
                is_saved: false,
            };
            state.results.push(record.clone());
            records.push(record);
        }
        Ok(records)
    }

    async fn history(&self, conversation_id: i64) -> Result<Vec<HistoryEntry>, AppError> {
        let state = self.state.lock().unwrap();
        state.ensure_conversation(conversation_id)?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| HistoryEntry {
                role: m.role,
                content: m.content.clone(),
                sql: state
                    .results
                    .iter()
                    .rev()
                    .find(|r| r.message_id == m.id && r.result_type == ResultType::Sql)
                    .map(|r| r.content.clone()),
                selected_tables: m.selected_tables.clone(),
            })
            .collect())
    }

    async fn messages(&self, conversation_id: i64) -> Result<Vec<MessageWithResults>, AppError> {
        let state = self.state.lock().unwrap();
        state.ensure_conversation(conversation_id)?;
        Ok(state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| MessageWithResults {
                message: m.clone(),
                results: state
                    .results
                    .iter()
                    .filter(|r| r.message_id == m.id)
                    .cloned()
                    .collect(),
            })
            .collect())
    }

    async fn result(&self, result_id: i64) -> Result<ResultRecord, AppError> {
        self.state
            .lock()
            .unwrap()
            .results
            .iter()
            .find(|r| r.id == result_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))
    }

    async fn toggle_saved(&self, result_id: i64) -> Result<bool, AppError> {
        let mut state = self.state.lock().unwrap();
        let result = state
            .results
            .iter_mut()
            .find(|r| r.id == result_id)
            .ok_or_else(|| AppError::NotFound(format!("Result {result_id} not found")))?;
        result.is_saved = !result.is_saved;
        Ok(result.is_saved)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Agent
// ────────────────────────────────────────────────────────────────────────────

/// Replays scripted answers in order, repeating the last one once the
/// script runs out. Records what every call was asked.
pub struct StubAgent {
    script: Vec<StructuredResult>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub question: String,
    pub context: String,
    pub history: Vec<HistoryEntry>,
    pub correction: Option<Correction>,
}

impl StubAgent {
    pub fn scripted(script: Vec<StructuredResult>) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Sleeps before answering, like a model round trip.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn always(result: StructuredResult) -> Self {
        Self::scripted(vec![result])
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SqlAgent for StubAgent {
    async fn generate(
        &self,
        request: &GenerationRequest<'_>,
    ) -> Result<StructuredResult, AppError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut calls = self.calls.lock().unwrap();
        calls.push(RecordedCall {
            question: request.question.to_string(),
            context: request.context.to_string(),
            history: request.history.to_vec(),
            correction: request.correction.cloned(),
        });

        let index = (calls.len() - 1).min(self.script.len().saturating_sub(1));
        self.script
            .get(index)
            .cloned()
            .ok_or_else(|| AppError::Generation("empty script".to_string()))?
            .into_checked()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Executor
// ────────────────────────────────────────────────────────────────────────────

/// Counts calls and answers every query with fixed rows or a fixed error.
#[derive(Default)]
pub struct RecordingExecutor {
    rows: QueryRows,
    failure: Option<String>,
    tables: Vec<IntrospectedTable>,
    executed: Mutex<Vec<String>>,
    introspections: AtomicUsize,
}

impl RecordingExecutor {
    pub fn returning(rows: QueryRows) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            failure: Some(message.to_string()),
            ..Self::default()
        }
    }

    pub fn with_shop_tables() -> Self {
        Self {
            tables: shop_introspection(),
            ..Self::default()
        }
    }

    pub fn execute_calls(&self) -> usize {
        self.executed.lock().unwrap().len()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().unwrap().clone()
    }

    pub fn introspect_calls(&self) -> usize {
        self.introspections.load(Ordering::SeqCst)
    }
}

pub fn count_rows(count: i64) -> QueryRows {
    QueryRows {
        columns: vec!["count".to_string()],
        rows: vec![vec![json!(count)]],
    }
}

#[async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(
        &self,
        _connection: &Connection,
        sql: &str,
    ) -> Result<QueryRows, ExecutionError> {
        self.executed.lock().unwrap().push(sql.to_string());
        match &self.failure {
            Some(message) => Err(ExecutionError::new(message.clone())),
            None => Ok(self.rows.clone()),
        }
    }

    async fn introspect(
        &self,
        _connection: &Connection,
    ) -> Result<Vec<IntrospectedTable>, ExecutionError> {
        self.introspections.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wired pipeline
// ────────────────────────────────────────────────────────────────────────────

/// A pipeline over the shop fixture with in-memory everything.
pub struct Harness {
    pub catalog: Arc<MemoryCatalog>,
    pub conversations: Arc<MemoryConversationStore>,
    pub agent: Arc<StubAgent>,
    pub executor: Arc<RecordingExecutor>,
    pub relevance: Arc<SchemaIndexRegistry>,
    pub pipeline: Arc<QueryPipeline>,
    _index_dir: TempDir,
}

impl Harness {
    pub fn new(agent: StubAgent, executor: RecordingExecutor) -> Self {
        Self::with_store(agent, executor, MemoryConversationStore::default())
    }

    pub fn with_store(
        agent: StubAgent,
        executor: RecordingExecutor,
        conversations: MemoryConversationStore,
    ) -> Self {
        let index_dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::shop());
        let conversations = Arc::new(conversations);
        let agent = Arc::new(agent);
        let executor = Arc::new(executor);
        let relevance = Arc::new(SchemaIndexRegistry::new(
            catalog.clone(),
            executor.clone(),
            Arc::new(HashingEmbedder::default()),
            index_dir.path().to_path_buf(),
            0.25,
            4,
        ));
        let pipeline = Arc::new(QueryPipeline::new(
            catalog.clone(),
            conversations.clone(),
            relevance.clone(),
            agent.clone(),
            executor.clone(),
        ));

        Self {
            catalog,
            conversations,
            agent,
            executor,
            relevance,
            pipeline,
            _index_dir: index_dir,
        }
    }

    pub async fn conversation(&self) -> i64 {
        self.conversations
            .create_conversation(SHOP_CONNECTION, "Shop questions")
            .await
            .unwrap()
            .id
    }

    pub fn state(&self) -> AppState {
        AppState {
            catalog: self.catalog.clone(),
            conversations: self.conversations.clone(),
            relevance: self.relevance.clone(),
            pipeline: self.pipeline.clone(),
        }
    }
}
