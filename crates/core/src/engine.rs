use crate::chunking::chunk_pages;
use crate::config::EngineConfig;
use crate::context::ContextAssembler;
use crate::embeddings::{EmbeddingPool, Lane};
use crate::error::{IndexConsistencyError, IngestError, QueryError};
use crate::extractor::parse_document;
use crate::index::ChunkIndex;
use crate::ingest::digest_bytes;
use crate::keywords::TermFrequencyExtractor;
use crate::models::{
    DocumentKind, DocumentRecord, DocumentStatus, IndexedChunk, IngestReceipt, RemoveOutcome,
    SearchQuery, SearchResponse,
};
use crate::retriever::Retriever;
use crate::traits::{Embedder, KeywordExtractor};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct RegistryEntry {
    record: DocumentRecord,
    generation: u64,
}

#[derive(Debug, Default)]
struct Registry {
    documents: HashMap<String, RegistryEntry>,
    next_generation: u64,
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<Registry>,
    index: Arc<ChunkIndex>,
    pool: Arc<EmbeddingPool>,
    keywords: Arc<dyn KeywordExtractor>,
    retriever: Retriever,
    assembler: ContextAssembler,
}

/// Owns the document registry and the chunk index. Cloning yields another handle to the
/// same engine.
///
/// Lock order is registry, then index.
#[derive(Clone)]
pub struct RetrievalEngine {
    inner: Arc<EngineInner>,
}

impl RetrievalEngine {
    pub fn new(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self, IngestError> {
        config.validate()?;

        let keywords: Arc<dyn KeywordExtractor> =
            Arc::new(TermFrequencyExtractor::new(config.keywords_per_chunk)?);
        let index = Arc::new(ChunkIndex::new(embedder.dimensions()));
        let pool = Arc::new(EmbeddingPool::new(embedder, config.embedding));
        let retriever = Retriever::new(
            Arc::clone(&index),
            Arc::clone(&pool),
            Arc::clone(&keywords),
            config.keyword_threshold,
        );
        let assembler = ContextAssembler::new(config.max_context_chars);

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry: RwLock::new(Registry::default()),
                index,
                pool,
                keywords,
                retriever,
                assembler,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// A query pre-filled with the configured `top_k` and similarity threshold.
    pub fn query(&self, text: impl Into<String>) -> SearchQuery {
        SearchQuery::new(
            text,
            self.inner.config.default_top_k,
            self.inner.config.similarity_threshold,
        )
    }

    /// Parses, chunks, embeds and indexes a document. The work runs as its own task, so a
    /// caller that stops waiting does not interrupt it.
    pub async fn ingest(
        &self,
        document_id: impl Into<String>,
        filename: impl Into<String>,
        bytes: Vec<u8>,
        kind: DocumentKind,
    ) -> Result<IngestReceipt, IngestError> {
        let inner = Arc::clone(&self.inner);
        let document_id = document_id.into();
        let filename = filename.into();
        tokio::spawn(async move { inner.ingest_document(document_id, filename, bytes, kind).await })
            .await?
    }

    pub async fn ingest_new(
        &self,
        filename: impl Into<String>,
        bytes: Vec<u8>,
        kind: DocumentKind,
    ) -> Result<IngestReceipt, IngestError> {
        self.ingest(Uuid::new_v4().to_string(), filename, bytes, kind)
            .await
    }

    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResponse, QueryError> {
        self.inner.check_filter(query).await?;
        let retrieval = self.inner.retriever.retrieve(query).await?;
        let context = self.inner.assembler.assemble(&retrieval);
        Ok(SearchResponse { retrieval, context })
    }

    pub async fn remove(&self, document_id: &str) -> RemoveOutcome {
        let mut registry = self.inner.registry.write().await;
        if registry.documents.remove(document_id).is_none() {
            return RemoveOutcome::NotFound;
        }
        let chunks = self.inner.index.remove_document(document_id).await;
        info!(document_id, chunks, "document removed");
        RemoveOutcome::Removed { chunks }
    }

    pub async fn document(&self, document_id: &str) -> Option<DocumentRecord> {
        self.inner
            .registry
            .read()
            .await
            .documents
            .get(document_id)
            .map(|entry| entry.record.clone())
    }

    /// All known documents, oldest first.
    pub async fn list_documents(&self) -> Vec<DocumentRecord> {
        let registry = self.inner.registry.read().await;
        let mut records = registry
            .documents
            .values()
            .map(|entry| entry.record.clone())
            .collect::<Vec<_>>();
        records.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.document_id.cmp(&right.document_id))
        });
        records
    }

    pub async fn document_chunks(&self, document_id: &str) -> Vec<IndexedChunk> {
        self.inner.index.document_chunks(document_id).await
    }

    pub async fn indexed_chunk_count(&self) -> usize {
        self.inner.index.len().await
    }
}

impl EngineInner {
    async fn ingest_document(
        &self,
        document_id: String,
        filename: String,
        bytes: Vec<u8>,
        kind: DocumentKind,
    ) -> Result<IngestReceipt, IngestError> {
        if document_id.trim().is_empty() {
            return Err(IngestError::InvalidArgument("document id is empty".to_string()));
        }

        let generation = self.register(&document_id, &filename, &bytes, kind).await;
        self.set_status(&document_id, generation, DocumentStatus::Processing)
            .await;

        match self.build_chunks(&document_id, &filename, bytes, kind).await {
            Ok(chunks) => self.commit(&document_id, generation, chunks).await,
            Err(error) => {
                self.fail(&document_id, generation, &error).await;
                Err(error)
            }
        }
    }

    async fn register(
        &self,
        document_id: &str,
        filename: &str,
        bytes: &[u8],
        kind: DocumentKind,
    ) -> u64 {
        let mut registry = self.registry.write().await;
        registry.next_generation += 1;
        let generation = registry.next_generation;
        registry.documents.insert(
            document_id.to_string(),
            RegistryEntry {
                record: DocumentRecord {
                    document_id: document_id.to_string(),
                    filename: filename.to_string(),
                    kind,
                    status: DocumentStatus::Uploaded,
                    chunk_count: 0,
                    checksum: digest_bytes(bytes),
                    created_at: Utc::now(),
                    last_error: None,
                },
                generation,
            },
        );
        info!(document_id, filename, %kind, "document uploaded");
        generation
    }

    async fn set_status(&self, document_id: &str, generation: u64, status: DocumentStatus) {
        let mut registry = self.registry.write().await;
        if let Some(entry) = registry.documents.get_mut(document_id) {
            if entry.generation == generation {
                entry.record.status = status;
            }
        }
    }

    async fn build_chunks(
        &self,
        document_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        kind: DocumentKind,
    ) -> Result<Vec<IndexedChunk>, IngestError> {
        let max_bytes = self.config.max_document_bytes;
        let chunking = self.config.chunking;
        let keywords = Arc::clone(&self.keywords);
        let drafts = tokio::task::spawn_blocking(move || {
            let pages = parse_document(&bytes, kind, max_bytes)?;
            chunk_pages(&pages, &chunking, keywords.as_ref())
        })
        .await??;

        if drafts.is_empty() {
            return Err(IngestError::EmptyDocument(document_id.to_string()));
        }

        let texts = drafts
            .iter()
            .map(|draft| draft.text.trim().to_string())
            .collect::<Vec<_>>();
        let embeddings = self
            .pool
            .embed_all(Lane::Ingest, &texts)
            .await
            .map_err(|source| IndexConsistencyError::EmbeddingFailed {
                document_id: document_id.to_string(),
                source,
            })?;

        Ok(drafts
            .into_iter()
            .zip(embeddings)
            .map(|(draft, embedding)| IndexedChunk::from_draft(document_id, filename, draft, embedding))
            .collect())
    }

    async fn commit(
        &self,
        document_id: &str,
        generation: u64,
        chunks: Vec<IndexedChunk>,
    ) -> Result<IngestReceipt, IngestError> {
        let mut registry = self.registry.write().await;
        let current = registry
            .documents
            .get(document_id)
            .is_some_and(|entry| entry.generation == generation);
        if !current {
            info!(document_id, "discarding superseded ingest");
            return Err(IngestError::Superseded(document_id.to_string()));
        }

        let outcome = self.index.replace_document(document_id, chunks).await;
        let Some(entry) = registry.documents.get_mut(document_id) else {
            return Err(IngestError::Superseded(document_id.to_string()));
        };

        match outcome {
            Ok(chunk_count) => {
                entry.record.status = DocumentStatus::Ready;
                entry.record.chunk_count = chunk_count;
                entry.record.last_error = None;
                info!(document_id, chunk_count, "document ready");
                Ok(IngestReceipt {
                    document_id: document_id.to_string(),
                    status: DocumentStatus::Ready,
                    chunk_count,
                })
            }
            Err(error) => {
                // A failed re-upload must not leave the previous version searchable.
                let removed = self.index.remove_document(document_id).await;
                entry.record.status = DocumentStatus::Failed;
                entry.record.chunk_count = 0;
                entry.record.last_error = Some(error.to_string());
                warn!(document_id, removed, %error, "document failed during indexing");
                Err(error.into())
            }
        }
    }

    async fn fail(&self, document_id: &str, generation: u64, error: &IngestError) {
        let mut registry = self.registry.write().await;
        let Some(entry) = registry.documents.get_mut(document_id) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        let removed = self.index.remove_document(document_id).await;
        entry.record.status = DocumentStatus::Failed;
        entry.record.chunk_count = 0;
        entry.record.last_error = Some(error.to_string());
        warn!(document_id, removed, %error, "document failed");
    }

    async fn check_filter(&self, query: &SearchQuery) -> Result<(), QueryError> {
        let Some(ids) = &query.document_ids else {
            return Ok(());
        };
        let registry = self.registry.read().await;
        let unknown = ids
            .iter()
            .filter(|id| !registry.documents.contains_key(id.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if unknown.is_empty() {
            Ok(())
        } else {
            Err(QueryError::UnknownDocuments(unknown))
        }
    }
}
