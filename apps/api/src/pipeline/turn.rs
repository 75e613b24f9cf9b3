use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::agent::{GenerationRequest, SqlAgent};
use crate::catalog::SchemaCatalog;
use crate::conversation::ConversationStore;
use crate::errors::AppError;
use crate::executor::{QueryExecutor, QueryRows};
use crate::models::conversation::MessageWithResults;
use crate::pipeline::correction::{resolve, AttemptState};
use crate::pipeline::locks::TurnLocks;
use crate::relevance::SchemaIndexRegistry;

/// What one question produced.
#[derive(Debug, Serialize)]
pub struct TurnOutcome {
    pub user_message_id: i64,
    pub reply: MessageWithResults,
    pub selected_tables: Vec<String>,
    /// Rows of the executed query, when there was one and it ran.
    pub rows: Option<QueryRows>,
    pub attempt: AttemptState,
}

/// Question → relevant tables → agent → validated execution → persisted turn.
pub struct QueryPipeline {
    catalog: Arc<dyn SchemaCatalog>,
    conversations: Arc<dyn ConversationStore>,
    relevance: Arc<SchemaIndexRegistry>,
    agent: Arc<dyn SqlAgent>,
    executor: Arc<dyn QueryExecutor>,
    turns: TurnLocks,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        conversations: Arc<dyn ConversationStore>,
        relevance: Arc<SchemaIndexRegistry>,
        agent: Arc<dyn SqlAgent>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            catalog,
            conversations,
            relevance,
            agent,
            executor,
            turns: TurnLocks::default(),
        }
    }

    /// Answers `question` inside a conversation.
    ///
    /// Turns on one conversation run one at a time, from the history read to
    /// the stored answer, so each turn sees the previous one. Nothing is
    /// persisted when no table is relevant. Once the user message is stored, a
    /// failure leaves it without a reply; the reply and its results are stored
    /// together or not at all.
    pub async fn run_turn(
        &self,
        conversation_id: i64,
        question: &str,
    ) -> Result<TurnOutcome, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("Question must not be empty".to_string()));
        }

        let conversation = self.conversations.conversation(conversation_id).await?;
        let connection = self.catalog.connection(conversation.connection_id).await?;

        let _turn = self.turns.acquire(conversation_id).await;
        let history = self.conversations.history(conversation_id).await?;

        let relevant = self.relevance.query(&connection, question).await?;
        if relevant.is_empty() {
            info!("No relevant tables for question in conversation {conversation_id}");
            return Err(AppError::RelatedTablesNotFound);
        }
        debug!("Selected tables: {:?}", relevant.tables);

        let user_message = self
            .conversations
            .append_turn(conversation_id, question, &relevant.tables)
            .await?;

        let request = GenerationRequest {
            dialect: &connection.dialect,
            question,
            context: &relevant.context,
            history: &history,
            correction: None,
        };
        let resolution = resolve(
            self.agent.as_ref(),
            self.executor.as_ref(),
            &connection,
            request,
        )
        .await?;

        if resolution.response.chart_request.is_some() {
            debug!("Chart request received; charts are not rendered");
        }

        let reply_text = resolution.response.text.clone().unwrap_or_default();
        let reply = self
            .conversations
            .append_answer(
                conversation_id,
                &reply_text,
                &relevant.tables,
                &resolution.results(),
            )
            .await?;

        info!(
            "Answered turn in conversation {conversation_id} ({:?}, {} results)",
            resolution.state,
            reply.results.len()
        );

        Ok(TurnOutcome {
            user_message_id: user_message.id,
            reply,
            selected_tables: relevant.tables,
            rows: resolution.rows().cloned(),
            attempt: resolution.state,
        })
    }
}
