pub mod chunking;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod index;
pub mod ingest;
pub mod keywords;
pub mod models;
pub mod retriever;
pub mod traits;

pub use chunking::{chunk_document, chunk_pages, DocumentText};
pub use config::{
    ChunkUnit, ChunkingConfig, EmbeddingPoolConfig, EngineConfig, EngineConfigBuilder,
    RetryPolicy,
};
pub use context::ContextAssembler;
pub use embeddings::{
    cosine_similarity, CharacterNgramEmbedder, EmbeddingPool, HttpEmbedder, HttpEmbedderConfig,
    Lane, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use engine::RetrievalEngine;
pub use error::{
    ConfigError, EmbeddingError, IndexConsistencyError, IngestError, ParseError, QueryError,
};
pub use extractor::{normalize_text, normalize_whitespace, parse_document, PageText};
pub use index::ChunkIndex;
pub use ingest::{
    digest_bytes, discover_documents, document_id_for_path, ingest_folder_best_effort,
    ingest_path, IngestionReport, SkippedDocument,
};
pub use keywords::{keyword_overlap, TermFrequencyExtractor};
pub use models::{
    AssembledContext, ChunkDraft, ChunkId, ContextOutcome, DocumentKind, DocumentRecord,
    DocumentStatus, IndexedChunk, IngestReceipt, RemoveOutcome, RetrievalMode, RetrievalResult,
    RetrievedChunk, SearchQuery, SearchResponse, SourceAttribution,
};
pub use retriever::Retriever;
pub use traits::{DocumentParser, Embedder, KeywordExtractor};
