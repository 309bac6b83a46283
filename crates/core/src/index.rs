use crate::embeddings::cosine_similarity;
use crate::error::IndexConsistencyError;
use crate::keywords::keyword_overlap;
use crate::models::{ChunkId, IndexedChunk, RetrievedChunk, SearchQuery};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct IndexState {
    chunks: BTreeMap<ChunkId, IndexedChunk>,
    /// Chunk count per document, kept in step with `chunks`.
    documents: BTreeMap<String, usize>,
}

impl IndexState {
    fn take_document(&mut self, document_id: &str) -> Vec<IndexedChunk> {
        let Some(count) = self.documents.remove(document_id) else {
            return Vec::new();
        };
        let mut removed = Vec::with_capacity(count);
        for ordinal in 0..count as u32 {
            if let Some(chunk) = self.chunks.remove(&ChunkId::new(document_id, ordinal)) {
                removed.push(chunk);
            }
        }
        removed
    }

    fn restore(&mut self, document_id: &str, chunks: Vec<IndexedChunk>) {
        if chunks.is_empty() {
            return;
        }
        self.documents.insert(document_id.to_string(), chunks.len());
        for chunk in chunks {
            self.chunks.insert(chunk.chunk_id.clone(), chunk);
        }
    }
}

/// Searchable chunk index behind a readers-writer lock. A document's chunks are swapped
/// in or out inside a single write section, so readers see all of them or none.
#[derive(Debug)]
pub struct ChunkIndex {
    dimensions: usize,
    state: RwLock<IndexState>,
}

impl ChunkIndex {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions,
            state: RwLock::new(IndexState::default()),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Replaces every chunk of `document_id` with `chunks`. On any consistency failure the
    /// chunks inserted so far are rolled back and the previous chunks are restored.
    pub async fn replace_document(
        &self,
        document_id: &str,
        chunks: Vec<IndexedChunk>,
    ) -> Result<usize, IndexConsistencyError> {
        let mut state = self.state.write().await;
        let previous = state.take_document(document_id);

        let mut inserted = Vec::with_capacity(chunks.len());
        let mut failure = None;
        for (position, chunk) in chunks.into_iter().enumerate() {
            if let Err(error) = self.check_chunk(document_id, position, &chunk) {
                failure = Some(error);
                break;
            }
            if state.chunks.contains_key(&chunk.chunk_id) {
                failure = Some(IndexConsistencyError::DuplicateChunk(chunk.chunk_id));
                break;
            }
            inserted.push(chunk.chunk_id.clone());
            state.chunks.insert(chunk.chunk_id.clone(), chunk);
        }

        if let Some(error) = failure {
            for chunk_id in &inserted {
                state.chunks.remove(chunk_id);
            }
            state.restore(document_id, previous);
            warn!(document_id, rolled_back = inserted.len(), %error, "index insert rolled back");
            return Err(error);
        }

        let count = inserted.len();
        if count > 0 {
            state.documents.insert(document_id.to_string(), count);
        }
        debug!(document_id, chunk_count = count, replaced = previous.len(), "document indexed");
        Ok(count)
    }

    fn check_chunk(
        &self,
        document_id: &str,
        position: usize,
        chunk: &IndexedChunk,
    ) -> Result<(), IndexConsistencyError> {
        if chunk.chunk_id.document_id != document_id {
            return Err(IndexConsistencyError::ForeignChunk {
                chunk: chunk.chunk_id.clone(),
                document_id: document_id.to_string(),
            });
        }
        if chunk.chunk_id.ordinal as usize != position {
            return Err(IndexConsistencyError::NonContiguousOrdinals {
                document_id: document_id.to_string(),
                position,
                found: chunk.chunk_id.ordinal,
            });
        }
        if chunk.embedding.len() != self.dimensions {
            return Err(IndexConsistencyError::DimensionMismatch {
                chunk: chunk.chunk_id.clone(),
                expected: self.dimensions,
                actual: chunk.embedding.len(),
            });
        }
        Ok(())
    }

    /// Removes all chunks of a document, returning how many were removed.
    pub async fn remove_document(&self, document_id: &str) -> usize {
        let mut state = self.state.write().await;
        state.take_document(document_id).len()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.chunks.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.chunks.is_empty()
    }

    pub async fn document_chunk_count(&self, document_id: &str) -> usize {
        self.state
            .read()
            .await
            .documents
            .get(document_id)
            .copied()
            .unwrap_or(0)
    }

    pub async fn document_chunks(&self, document_id: &str) -> Vec<IndexedChunk> {
        let state = self.state.read().await;
        let count = state.documents.get(document_id).copied().unwrap_or(0);
        (0..count as u32)
            .filter_map(|ordinal| state.chunks.get(&ChunkId::new(document_id, ordinal)).cloned())
            .collect()
    }

    pub async fn chunk_ids(&self) -> Vec<ChunkId> {
        self.state.read().await.chunks.keys().cloned().collect()
    }

    /// Cosine-ranks every in-scope chunk against `vector`.
    pub async fn search_semantic(&self, vector: &[f32], query: &SearchQuery) -> Vec<RetrievedChunk> {
        let state = self.state.read().await;
        let scored = state
            .chunks
            .values()
            .filter(|chunk| query.in_scope(&chunk.chunk_id.document_id))
            .map(|chunk| (chunk, cosine_similarity(vector, &chunk.embedding)))
            .collect::<Vec<_>>();
        rank(scored, query.top_k, query.similarity_threshold)
    }

    /// Ranks every in-scope chunk by the share of `keywords` found in its keyword set.
    pub async fn search_keywords(
        &self,
        keywords: &BTreeSet<String>,
        query: &SearchQuery,
        threshold: f32,
    ) -> Vec<RetrievedChunk> {
        let state = self.state.read().await;
        let scored = state
            .chunks
            .values()
            .filter(|chunk| query.in_scope(&chunk.chunk_id.document_id))
            .map(|chunk| (chunk, keyword_overlap(keywords, &chunk.keywords)))
            .filter(|(_, score)| *score > 0.0)
            .collect::<Vec<_>>();
        rank(scored, query.top_k, threshold)
    }
}

/// Keeps scores at or above `threshold`, best first, ties by ascending chunk id.
fn rank(scored: Vec<(&IndexedChunk, f32)>, top_k: usize, threshold: f32) -> Vec<RetrievedChunk> {
    let mut kept = scored
        .into_iter()
        .filter(|(_, score)| score.is_finite() && *score >= threshold)
        .collect::<Vec<_>>();

    kept.sort_by(|(left, left_score), (right, right_score)| {
        right_score
            .partial_cmp(left_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| left.chunk_id.cmp(&right.chunk_id))
    });

    kept.into_iter()
        .take(top_k)
        .map(|(chunk, score)| RetrievedChunk {
            chunk_id: chunk.chunk_id.clone(),
            document_name: chunk.document_name.clone(),
            page: chunk.page,
            char_start: chunk.char_start,
            char_end: chunk.char_end,
            text: chunk.text.clone(),
            score,
        })
        .collect()
}
