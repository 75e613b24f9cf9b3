//! Conversation Store: ordered messages per conversation, each assistant
//! message carrying its typed results.

pub mod handlers;
pub mod store;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::conversation::{
    Conversation, HistoryEntry, Message, MessageWithResults, ResultRecord, UnsavedResult,
};

pub use store::PgConversationStore;

/// Carried in `AppState` as `Arc<dyn ConversationStore>`.
///
/// Messages are ordered by `(created_at, id)`. Appends to one conversation
/// are serialized; different conversations never block each other.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// `NotFound` when the connection does not exist.
    async fn create_conversation(
        &self,
        connection_id: Uuid,
        name: &str,
    ) -> Result<Conversation, AppError>;

    async fn conversation(&self, conversation_id: i64) -> Result<Conversation, AppError>;

    /// Removes the conversation with all of its messages and results.
    async fn delete_conversation(&self, conversation_id: i64) -> Result<(), AppError>;

    /// Appends the user's message.
    async fn append_turn(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError>;

    /// Appends the assistant's message and its results in one transaction:
    /// either all of them are stored or none.
    async fn append_answer(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
        results: &[UnsavedResult],
    ) -> Result<MessageWithResults, AppError>;

    /// Appends the assistant's message.
    async fn append_reply(
        &self,
        conversation_id: i64,
        content: &str,
        selected_tables: &[String],
    ) -> Result<Message, AppError>;

    /// Attaches results to an assistant message, in the given order. Results
    /// on a user message are a `Validation` error.
    async fn append_results(
        &self,
        message_id: i64,
        results: &[UnsavedResult],
    ) -> Result<Vec<ResultRecord>, AppError>;

    /// Every message in order, with the latest SQL result of each.
    async fn history(&self, conversation_id: i64) -> Result<Vec<HistoryEntry>, AppError>;

    async fn messages(&self, conversation_id: i64) -> Result<Vec<MessageWithResults>, AppError>;

    async fn result(&self, result_id: i64) -> Result<ResultRecord, AppError>;

    /// Flips `is_saved` and returns the new value.
    async fn toggle_saved(&self, result_id: i64) -> Result<bool, AppError>;
}
