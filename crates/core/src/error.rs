use crate::models::{ChunkId, DocumentKind};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is empty")]
    Empty,

    #[error("document is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },

    #[error("document is encrypted")]
    Encrypted,

    #[error("corrupt {kind} document: {details}")]
    Corrupt { kind: DocumentKind, details: String },

    #[error("{kind} document had no readable text")]
    NoReadableText { kind: DocumentKind },

    #[error("unsupported document type: {0}")]
    Unsupported(String),
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider {provider} failed: {message}")]
    Provider { provider: String, message: String },

    #[error("embedding timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("embedding dimension {actual} != {expected}")]
    Dimension { expected: usize, actual: usize },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("embedding worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Error)]
pub enum IndexConsistencyError {
    #[error("chunk {chunk} has embedding dimension {actual}, index expects {expected}")]
    DimensionMismatch {
        chunk: ChunkId,
        expected: usize,
        actual: usize,
    },

    #[error("chunk {0} was inserted twice")]
    DuplicateChunk(ChunkId),

    #[error("chunk ordinals for {document_id} are not contiguous from 0 (found {found} at position {position})")]
    NonContiguousOrdinals {
        document_id: String,
        position: usize,
        found: u32,
    },

    #[error("chunk {chunk} does not belong to document {document_id}")]
    ForeignChunk { chunk: ChunkId, document_id: String },

    #[error("embedding failed for document {document_id}: {source}")]
    EmbeddingFailed {
        document_id: String,
        #[source]
        source: EmbeddingError,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum QueryError {
    #[error("question is empty")]
    EmptyQuestion,

    #[error("top_k must be positive, got {0}")]
    InvalidTopK(usize),

    #[error("similarity threshold must be a finite value in [-1, 1], got {0}")]
    InvalidThreshold(f32),

    #[error("document filter is empty")]
    EmptyFilter,

    #[error("unknown document ids in filter: {}", .0.join(", "))]
    UnknownDocuments(Vec<String>),
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("index consistency error: {0}")]
    Index(#[from] IndexConsistencyError),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("document {0} produced no text to index")]
    EmptyDocument(String),

    #[error("ingest of {0} was superseded by a newer upload or removal")]
    Superseded(String),

    #[error("ingest task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
