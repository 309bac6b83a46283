use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Pdf,
    Docx,
    Text,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "txt" | "md" => Some(Self::Text),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pdf => "pdf",
            Self::Docx => "docx",
            Self::Text => "text",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Uploaded => "uploaded",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub document_id: String,
    pub filename: String,
    pub kind: DocumentKind,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

/// Identifies a chunk by its owning document and its ordinal within that document.
///
/// Ordering is document id first, then ordinal, which is also document order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkId {
    pub document_id: String,
    pub ordinal: u32,
}

impl ChunkId {
    pub fn new(document_id: impl Into<String>, ordinal: u32) -> Self {
        Self {
            document_id: document_id.into(),
            ordinal,
        }
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.document_id, self.ordinal)
    }
}

/// A chunk produced by the chunker, before it is owned by a document and embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDraft {
    pub ordinal: u32,
    pub text: String,
    /// Character offsets into the normalized document text, end exclusive.
    pub char_start: usize,
    pub char_end: usize,
    pub page: u32,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk_id: ChunkId,
    pub document_name: String,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub page: u32,
    pub keywords: Vec<String>,
    #[serde(skip)]
    pub embedding: Vec<f32>,
}

impl IndexedChunk {
    pub fn from_draft(
        document_id: &str,
        document_name: &str,
        draft: ChunkDraft,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            chunk_id: ChunkId::new(document_id, draft.ordinal),
            document_name: document_name.to_string(),
            text: draft.text,
            char_start: draft.char_start,
            char_end: draft.char_end,
            page: draft.page,
            keywords: draft.keywords,
            embedding,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchQuery {
    pub text: String,
    pub document_ids: Option<BTreeSet<String>>,
    pub top_k: usize,
    pub similarity_threshold: f32,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize, similarity_threshold: f32) -> Self {
        Self {
            text: text.into(),
            document_ids: None,
            top_k,
            similarity_threshold,
        }
    }

    pub fn with_documents<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn in_scope(&self, document_id: &str) -> bool {
        self.document_ids
            .as_ref()
            .map_or(true, |ids| ids.contains(document_id))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalMode {
    Semantic,
    KeywordFallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: ChunkId,
    pub document_name: String,
    pub page: u32,
    pub char_start: usize,
    pub char_end: usize,
    pub text: String,
    pub score: f32,
}

impl RetrievedChunk {
    pub fn document_id(&self) -> &str {
        &self.chunk_id.document_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub mode: RetrievalMode,
    /// Why the retriever fell back to keyword scoring, when it did.
    pub degraded_reason: Option<String>,
    pub hits: Vec<RetrievedChunk>,
}

impl RetrievalResult {
    pub fn is_degraded(&self) -> bool {
        self.mode == RetrievalMode::KeywordFallback
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceAttribution {
    pub chunk_id: ChunkId,
    pub document_name: String,
    pub page: u32,
    pub score: f32,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    pub attributions: Vec<SourceAttribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ContextOutcome {
    Assembled(AssembledContext),
    NoRelevantContext,
}

impl ContextOutcome {
    pub fn context(&self) -> Option<&AssembledContext> {
        match self {
            Self::Assembled(context) => Some(context),
            Self::NoRelevantContext => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub retrieval: RetrievalResult,
    pub context: ContextOutcome,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestReceipt {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed { chunks: usize },
    NotFound,
}
