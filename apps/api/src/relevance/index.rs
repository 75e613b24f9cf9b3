//! Per-connection schema index: one embedded entry per table, persisted as a
//! JSON artifact and searched by cosine similarity.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::schema::TableSchema;
use crate::relevance::embedder::{Embedder, EmbeddingError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub table_id: Uuid,
    pub table_name: String,
    /// Schema block handed to the agent when this table is selected.
    pub context: String,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaIndex {
    pub connection_id: Uuid,
    pub model: String,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone)]
pub struct ScoredTable<'a> {
    pub entry: &'a IndexEntry,
    pub score: f32,
}

/// Tables selected for a question, as a prompt-ready context string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelevantTables {
    pub context: String,
    pub tables: Vec<String>,
}

impl RelevantTables {
    pub fn is_empty(&self) -> bool {
        self.context.trim().is_empty()
    }
}

impl SchemaIndex {
    pub async fn build(
        connection_id: Uuid,
        tables: &[TableSchema],
        embedder: &dyn Embedder,
    ) -> Result<Self, EmbeddingError> {
        let texts: Vec<String> = tables.iter().map(|t| t.embed_text()).collect();
        let embeddings = embedder.embed(&texts).await?;
        if embeddings.len() != tables.len() {
            return Err(EmbeddingError::Malformed(format!(
                "expected {} embeddings, got {}",
                tables.len(),
                embeddings.len()
            )));
        }

        let entries = tables
            .iter()
            .zip(embeddings)
            .map(|(table, embedding)| IndexEntry {
                table_id: table.id,
                table_name: table.name.clone(),
                context: table.context_block(),
                embedding,
            })
            .collect();

        Ok(Self {
            connection_id,
            model: embedder.model().to_string(),
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries scoring at least `threshold`, best first, at most `top_k`.
    pub fn search(&self, query: &[f32], threshold: f32, top_k: usize) -> Vec<ScoredTable<'_>> {
        let mut scored: Vec<ScoredTable<'_>> = self
            .entries
            .iter()
            .map(|entry| ScoredTable {
                entry,
                score: cosine_similarity(query, &entry.embedding),
            })
            .filter(|s| s.score >= threshold)
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }

    pub fn relevant_tables(&self, query: &[f32], threshold: f32, top_k: usize) -> RelevantTables {
        let hits = self.search(query, threshold, top_k);
        RelevantTables {
            context: hits
                .iter()
                .map(|h| h.entry.context.trim_end())
                .collect::<Vec<_>>()
                .join("\n\n"),
            tables: hits.iter().map(|h| h.entry.table_name.clone()).collect(),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create index directory {}", parent.display()))?;
        }
        let encoded = serde_json::to_vec(self).context("Failed to serialize schema index")?;
        tokio::fs::write(path, encoded)
            .await
            .with_context(|| format!("Failed to write schema index {}", path.display()))
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read schema index {}", path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("Failed to parse schema index {}", path.display()))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
