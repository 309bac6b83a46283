use crate::error::{EmbeddingError, ParseError};
use crate::extractor::PageText;

/// Turns raw document bytes into normalized page text.
pub trait DocumentParser: Send + Sync {
    fn parse_pages(&self, bytes: &[u8]) -> Result<Vec<PageText>, ParseError>;
}

/// Maps text to a fixed-dimension vector. Implementations may block; callers run them
/// on the embedding worker pool.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dimensions(&self) -> usize;
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

pub trait KeywordExtractor: Send + Sync {
    /// Returns keywords ordered by descending score.
    fn extract(&self, text: &str) -> Vec<String>;
}
