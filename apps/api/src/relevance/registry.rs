use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::catalog::SchemaCatalog;
use crate::errors::AppError;
use crate::executor::QueryExecutor;
use crate::models::connection::Connection;
use crate::relevance::embedder::Embedder;
use crate::relevance::index::{RelevantTables, SchemaIndex};

#[derive(Default)]
struct IndexCache {
    indexes: HashMap<Uuid, Arc<SchemaIndex>>,
    /// Bumped by every invalidation. A build started under an older
    /// generation is not published.
    generations: HashMap<Uuid, u64>,
}

impl IndexCache {
    fn generation(&self, connection_id: Uuid) -> u64 {
        self.generations.get(&connection_id).copied().unwrap_or(0)
    }
}

/// Owns every connection's schema index: loads the persisted artifact on
/// first use, builds it when missing or stale, and answers relevance queries
/// from an in-memory cache.
pub struct SchemaIndexRegistry {
    catalog: Arc<dyn SchemaCatalog>,
    executor: Arc<dyn QueryExecutor>,
    embedder: Arc<dyn Embedder>,
    index_dir: PathBuf,
    threshold: f32,
    top_k: usize,
    cache: RwLock<IndexCache>,
}

impl SchemaIndexRegistry {
    pub fn new(
        catalog: Arc<dyn SchemaCatalog>,
        executor: Arc<dyn QueryExecutor>,
        embedder: Arc<dyn Embedder>,
        index_dir: PathBuf,
        threshold: f32,
        top_k: usize,
    ) -> Self {
        Self {
            catalog,
            executor,
            embedder,
            index_dir,
            threshold,
            top_k,
            cache: RwLock::new(IndexCache::default()),
        }
    }

    /// The tables most related to `question`. Empty when nothing clears the
    /// threshold; the caller decides what that means.
    pub async fn query(
        &self,
        connection: &Connection,
        question: &str,
    ) -> Result<RelevantTables, AppError> {
        let index = self.index_for(connection).await?;
        if index.is_empty() {
            return Ok(RelevantTables::default());
        }

        let vectors = self
            .embedder
            .embed(&[question.to_string()])
            .await
            .map_err(|e| AppError::Llm(format!("Failed to embed question: {e}")))?;
        let query = vectors
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Llm("Embedder returned no vector".to_string()))?;

        Ok(index.relevant_tables(&query, self.threshold, self.top_k))
    }

    pub async fn index_for(&self, connection: &Connection) -> Result<Arc<SchemaIndex>, AppError> {
        let generation = {
            let cache = self.cache.read().await;
            if let Some(index) = cache.indexes.get(&connection.id) {
                return Ok(index.clone());
            }
            cache.generation(connection.id)
        };

        let (index, artifact) = match self.load_persisted(connection.id).await? {
            Some(index) => (index, None),
            None => {
                let (index, path) = self.build(connection).await?;
                (index, Some(path))
            }
        };

        let index = Arc::new(index);
        self.publish(connection.id, generation, index.clone(), artifact.as_deref())
            .await?;
        Ok(index)
    }

    /// Caches `index` and records a freshly built artifact in the ledger,
    /// unless the connection was invalidated since `generation` was read.
    /// Returns whether the index was published.
    async fn publish(
        &self,
        connection_id: Uuid,
        generation: u64,
        index: Arc<SchemaIndex>,
        artifact: Option<&Path>,
    ) -> Result<bool, AppError> {
        let mut cache = self.cache.write().await;
        if cache.generation(connection_id) != generation {
            info!(
                "Schema index for connection {connection_id} was invalidated during the build, not caching it"
            );
            return Ok(false);
        }

        if let Some(path) = artifact {
            self.catalog
                .record_index(connection_id, &path.to_string_lossy())
                .await?;
        }
        cache.indexes.insert(connection_id, index);
        Ok(true)
    }

    /// Drops the cached index, the ledger row and the artifact. The next
    /// question rebuilds from current descriptions.
    pub async fn invalidate(&self, connection_id: Uuid) -> Result<(), AppError> {
        let mut cache = self.cache.write().await;
        *cache.generations.entry(connection_id).or_default() += 1;
        cache.indexes.remove(&connection_id);

        if let Some(file) = self.catalog.index_file(connection_id).await? {
            if let Err(e) = tokio::fs::remove_file(&file).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not remove index artifact {file}: {e}");
                }
            }
        }
        self.catalog.clear_index(connection_id).await?;
        info!("Invalidated schema index for connection {connection_id}");
        Ok(())
    }

    async fn load_persisted(&self, connection_id: Uuid) -> Result<Option<SchemaIndex>, AppError> {
        let Some(file) = self.catalog.index_file(connection_id).await? else {
            return Ok(None);
        };

        match SchemaIndex::load(Path::new(&file)).await {
            Ok(index) if index.model == self.embedder.model() => Ok(Some(index)),
            Ok(index) => {
                info!(
                    "Index for connection {connection_id} was built with {}, rebuilding with {}",
                    index.model,
                    self.embedder.model()
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Discarding unreadable index for connection {connection_id}: {e:#}");
                Ok(None)
            }
        }
    }

    /// Builds and saves the artifact. Recording it in the ledger is left to
    /// `publish`.
    async fn build(&self, connection: &Connection) -> Result<(SchemaIndex, PathBuf), AppError> {
        let mut tables = self.catalog.get_descriptions(connection.id).await?;

        if tables.is_empty() {
            info!(
                "No stored schema for connection {}, introspecting",
                connection.id
            );
            let introspected = self
                .executor
                .introspect(connection)
                .await
                .map_err(|e| AppError::Validation(format!("Could not read schema: {e}")))?;
            self.catalog
                .store_introspected(connection.id, &introspected)
                .await?;
            tables = self.catalog.get_descriptions(connection.id).await?;
        }

        let index = SchemaIndex::build(connection.id, &tables, self.embedder.as_ref())
            .await
            .map_err(|e| AppError::Llm(format!("Failed to embed schema: {e}")))?;

        let path = self.index_dir.join(format!("{}.json", connection.id));
        index.save(&path).await?;

        info!(
            "Built schema index for connection {} ({} tables, {})",
            connection.id,
            index.len(),
            index.model
        );
        Ok((index, path))
    }
}
