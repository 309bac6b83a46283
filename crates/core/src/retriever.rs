use crate::embeddings::{EmbeddingPool, Lane};
use crate::error::{EmbeddingError, QueryError};
use crate::index::ChunkIndex;
use crate::models::{RetrievalMode, RetrievalResult, SearchQuery};
use crate::traits::KeywordExtractor;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Retriever {
    index: Arc<ChunkIndex>,
    pool: Arc<EmbeddingPool>,
    keywords: Arc<dyn KeywordExtractor>,
    keyword_threshold: f32,
}

impl Retriever {
    pub fn new(
        index: Arc<ChunkIndex>,
        pool: Arc<EmbeddingPool>,
        keywords: Arc<dyn KeywordExtractor>,
        keyword_threshold: f32,
    ) -> Self {
        Self {
            index,
            pool,
            keywords,
            keyword_threshold,
        }
    }

    /// Ranks chunks by cosine similarity to the embedded question, falling back to
    /// keyword overlap when the question cannot be embedded.
    pub async fn retrieve(&self, query: &SearchQuery) -> Result<RetrievalResult, QueryError> {
        validate_query(query)?;

        let embedded = self.pool.embed(Lane::Query, &query.text).await.and_then(|vector| {
            if vector.len() == self.index.dimensions() {
                Ok(vector)
            } else {
                Err(EmbeddingError::Dimension {
                    expected: self.index.dimensions(),
                    actual: vector.len(),
                })
            }
        });

        let result = match embedded {
            Ok(vector) => RetrievalResult {
                query: query.text.clone(),
                mode: RetrievalMode::Semantic,
                degraded_reason: None,
                hits: self.index.search_semantic(&vector, query).await,
            },
            Err(error) => {
                warn!(provider = self.pool.provider(), %error, "query embedding failed, using keyword fallback");
                let keywords = self
                    .keywords
                    .extract(&query.text)
                    .into_iter()
                    .collect::<BTreeSet<_>>();
                RetrievalResult {
                    query: query.text.clone(),
                    mode: RetrievalMode::KeywordFallback,
                    degraded_reason: Some(error.to_string()),
                    hits: self
                        .index
                        .search_keywords(&keywords, query, self.keyword_threshold)
                        .await,
                }
            }
        };

        info!(
            mode = ?result.mode,
            hits = result.hits.len(),
            top_k = query.top_k,
            "retrieval finished"
        );
        Ok(result)
    }
}

pub fn validate_query(query: &SearchQuery) -> Result<(), QueryError> {
    if query.text.trim().is_empty() {
        return Err(QueryError::EmptyQuestion);
    }
    if query.top_k == 0 {
        return Err(QueryError::InvalidTopK(query.top_k));
    }
    if !query.similarity_threshold.is_finite() || query.similarity_threshold.abs() > 1.0 {
        return Err(QueryError::InvalidThreshold(query.similarity_threshold));
    }
    if query.document_ids.as_ref().is_some_and(|ids| ids.is_empty()) {
        return Err(QueryError::EmptyFilter);
    }
    Ok(())
}
