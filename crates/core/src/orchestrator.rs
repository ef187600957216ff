use crate::chunking::{split_chunks, ChunkingConfig};
use crate::embeddings::{embed_bounded, VectorProvider};
use crate::error::ConfigError;
use crate::index::build_index;
use crate::models::{Chunk, FallbackReason, IndexSummary, Retrieval, RetrievalOptions};
use crate::registry::IndexRegistry;
use tracing::{debug, error, warn};

/// Entry point of the retrieval core. Indexing fails only on configuration errors; retrieval
/// never fails and degrades to an empty result, leaving the choice of a default context to the
/// caller.
pub struct RetrievalOrchestrator<P> {
    provider: P,
    registry: IndexRegistry,
    options: RetrievalOptions,
}

impl<P> RetrievalOrchestrator<P>
where
    P: VectorProvider,
{
    pub fn new(provider: P, options: RetrievalOptions) -> Result<Self, ConfigError> {
        Self::with_registry(provider, options, IndexRegistry::new())
    }

    pub fn with_registry(
        provider: P,
        options: RetrievalOptions,
        registry: IndexRegistry,
    ) -> Result<Self, ConfigError> {
        options.validate()?;
        Ok(Self {
            provider,
            registry,
            options,
        })
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    pub fn registry(&self) -> &IndexRegistry {
        &self.registry
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub async fn index_document(
        &self,
        document_id: &str,
        text: &str,
    ) -> Result<IndexSummary, ConfigError> {
        let config = ChunkingConfig::try_from(&self.options)?;
        let chunks = split_chunks(text, config);
        self.index_chunks(document_id, chunks).await
    }

    /// Builds and publishes an index for `document_id`, replacing any earlier one. Builds of the
    /// same id run one at a time; the index is visible to readers only once complete.
    pub async fn index_chunks(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
    ) -> Result<IndexSummary, ConfigError> {
        let _build = self.registry.lock_for_build(document_id).await;
        let built = build_index(document_id, chunks, &self.provider, &self.options).await?;

        let summary = IndexSummary {
            document_id: document_id.to_string(),
            total_chunks: built.total_chunks,
            indexed_chunks: built.index.len(),
            failed_chunks: built.failed_chunks,
            skipped_blank: built.skipped_blank,
            dimension: built.index.dimension(),
        };

        if built.index.is_empty() && summary.total_chunks > summary.skipped_blank {
            warn!(
                document_id,
                failed = summary.failed_chunks,
                "no chunk could be embedded, semantic search unavailable for document"
            );
        }

        self.registry.put(document_id, built.index).await;
        Ok(summary)
    }

    pub async fn retrieve(&self, document_id: &str, query: &str, top_k: usize) -> Vec<String> {
        self.retrieve_scored(document_id, query, top_k).await.texts()
    }

    /// Fallback order: no index, blank query, empty index, query embedding failure, dimension
    /// mismatch. Each one yields no hits and names its reason.
    pub async fn retrieve_scored(
        &self,
        document_id: &str,
        query: &str,
        top_k: usize,
    ) -> Retrieval {
        let Some(index) = self.registry.get(document_id).await else {
            debug!(document_id, "no index registered for document");
            return Retrieval::fallback(FallbackReason::NoIndex);
        };

        if query.trim().is_empty() {
            debug!(document_id, "blank query");
            return Retrieval::fallback(FallbackReason::BlankQuery);
        }

        if index.is_empty() {
            debug!(document_id, "document index has no chunks");
            return Retrieval::fallback(FallbackReason::EmptyIndex);
        }

        let query_vector = match embed_bounded(
            &self.provider,
            query,
            self.options.max_input_chars,
            self.options.embed_timeout,
        )
        .await
        {
            Ok(vector) => vector,
            Err(error) => {
                warn!(document_id, %error, "query embedding failed, returning no context");
                return Retrieval::fallback(FallbackReason::QueryEmbeddingFailed);
            }
        };

        if index.dimension() != Some(query_vector.len()) {
            error!(
                document_id,
                index_dimension = ?index.dimension(),
                query_dimension = query_vector.len(),
                "query embedding dimension does not match document index"
            );
            return Retrieval::fallback(FallbackReason::DimensionMismatch);
        }

        let hits = index.rank_scored(&query_vector, top_k);
        debug!(
            document_id,
            hits = hits.len(),
            best_score = hits.first().map(|hit| hit.score),
            "ranked document chunks"
        );

        Retrieval {
            hits,
            fallback: None,
        }
    }

    pub async fn delete(&self, document_id: &str) {
        self.registry.delete(document_id).await;
    }
}
