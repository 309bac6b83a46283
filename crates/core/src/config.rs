use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    Chars,
    Words,
}

/// Window sizes are all measured in `unit`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub unit: ChunkUnit,
    pub max_chunk_size: usize,
    pub overlap_size: usize,
    /// How far back from the hard window end a paragraph, sentence or word boundary is searched for.
    pub boundary_tolerance: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            unit: ChunkUnit::Chars,
            max_chunk_size: 1_000,
            overlap_size: 200,
            boundary_tolerance: 200,
        }
    }
}

impl ChunkingConfig {
    pub fn words(max_chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            unit: ChunkUnit::Words,
            max_chunk_size,
            overlap_size,
            boundary_tolerance: max_chunk_size / 10,
        }
    }

    pub fn chars(max_chunk_size: usize, overlap_size: usize) -> Self {
        Self {
            unit: ChunkUnit::Chars,
            max_chunk_size,
            overlap_size,
            boundary_tolerance: max_chunk_size / 5,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be greater than zero".to_string());
        }
        if self.overlap_size >= self.max_chunk_size {
            return Err(format!(
                "overlap_size ({}) must be less than max_chunk_size ({})",
                self.overlap_size, self.max_chunk_size
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Exponential backoff for the given 1-based retry attempt.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingPoolConfig {
    pub ingest_workers: usize,
    pub query_workers: usize,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

impl Default for EmbeddingPoolConfig {
    fn default() -> Self {
        Self {
            ingest_workers: 4,
            query_workers: 2,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    pub chunking: ChunkingConfig,
    pub keywords_per_chunk: usize,
    pub max_document_bytes: usize,
    pub default_top_k: usize,
    pub similarity_threshold: f32,
    /// Minimum fraction of query keywords a chunk must share in keyword fallback mode.
    pub keyword_threshold: f32,
    pub max_context_chars: usize,
    pub embedding: EmbeddingPoolConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            keywords_per_chunk: 15,
            max_document_bytes: 50 * 1024 * 1024,
            default_top_k: 5,
            similarity_threshold: 0.2,
            keyword_threshold: 0.0,
            max_context_chars: 4_000,
            embedding: EmbeddingPoolConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunking.validate().map_err(ConfigError::Invalid)?;
        if self.keywords_per_chunk == 0 {
            return Err(ConfigError::Invalid(
                "keywords_per_chunk must be greater than zero".to_string(),
            ));
        }
        if self.max_document_bytes == 0 {
            return Err(ConfigError::Invalid(
                "max_document_bytes must be greater than zero".to_string(),
            ));
        }
        if self.default_top_k == 0 {
            return Err(ConfigError::Invalid(
                "default_top_k must be greater than zero".to_string(),
            ));
        }
        if !self.similarity_threshold.is_finite() || self.similarity_threshold.abs() > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "similarity_threshold ({}) must be within [-1, 1]",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.keyword_threshold) {
            return Err(ConfigError::Invalid(format!(
                "keyword_threshold ({}) must be within [0, 1]",
                self.keyword_threshold
            )));
        }
        if self.max_context_chars == 0 {
            return Err(ConfigError::Invalid(
                "max_context_chars must be greater than zero".to_string(),
            ));
        }
        if self.embedding.ingest_workers == 0 || self.embedding.query_workers == 0 {
            return Err(ConfigError::Invalid(
                "embedding worker counts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn chunking(mut self, chunking: ChunkingConfig) -> Self {
        self.config.chunking = chunking;
        self
    }

    pub fn keywords_per_chunk(mut self, count: usize) -> Self {
        self.config.keywords_per_chunk = count;
        self
    }

    pub fn max_document_bytes(mut self, bytes: usize) -> Self {
        self.config.max_document_bytes = bytes;
        self
    }

    pub fn default_top_k(mut self, top_k: usize) -> Self {
        self.config.default_top_k = top_k;
        self
    }

    pub fn similarity_threshold(mut self, threshold: f32) -> Self {
        self.config.similarity_threshold = threshold;
        self
    }

    pub fn keyword_threshold(mut self, threshold: f32) -> Self {
        self.config.keyword_threshold = threshold;
        self
    }

    pub fn max_context_chars(mut self, chars: usize) -> Self {
        self.config.max_context_chars = chars;
        self
    }

    pub fn embedding(mut self, embedding: EmbeddingPoolConfig) -> Self {
        self.config.embedding = embedding;
        self
    }

    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
