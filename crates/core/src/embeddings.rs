use crate::config::EmbeddingPoolConfig;
use crate::error::EmbeddingError;
use crate::traits::Embedder;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 128;

/// Hashes character trigrams into a fixed number of buckets and L2-normalizes the result.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn name(&self) -> &str {
        "char-trigram"
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Clone)]
pub struct HttpEmbedderConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub dimensions: usize,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    #[serde(default)]
    data: Option<Vec<EmbeddingDatum>>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Calls a remote embedding endpoint with a blocking client. Must run on a blocking
/// thread, which the embedding pool guarantees.
#[derive(Debug, Clone)]
pub struct HttpEmbedder {
    endpoint: Url,
    config: HttpEmbedderConfig,
    /// Built on first use, from a blocking thread.
    client: OnceLock<Client>,
}

impl HttpEmbedder {
    pub fn new(config: HttpEmbedderConfig) -> Result<Self, EmbeddingError> {
        let endpoint = Url::parse(config.endpoint.trim())?;
        Ok(Self {
            endpoint,
            config,
            client: OnceLock::new(),
        })
    }

    fn client(&self) -> Result<&Client, EmbeddingError> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = Client::builder().timeout(self.config.timeout).build()?;
        Ok(self.client.get_or_init(|| client))
    }
}

impl Embedder for HttpEmbedder {
    fn name(&self) -> &str {
        self.endpoint.as_str()
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let client = self.client()?;
        let payload = EmbeddingRequest {
            input: text,
            model: self.config.model.as_deref(),
        };

        let mut request = client
            .post(self.endpoint.clone())
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send()?;
        if !response.status().is_success() {
            return Err(EmbeddingError::Provider {
                provider: self.endpoint.to_string(),
                message: format!("endpoint returned {}", response.status()),
            });
        }

        let payload: EmbeddingResponse = response.json()?;
        vector_from_payload(payload, self.endpoint.as_str())
    }
}

fn vector_from_payload(
    payload: EmbeddingResponse,
    provider: &str,
) -> Result<Vec<f32>, EmbeddingError> {
    if let Some(vector) = payload.embedding {
        return Ok(vector);
    }

    payload
        .data
        .and_then(|data| data.into_iter().next())
        .map(|datum| datum.embedding)
        .ok_or_else(|| EmbeddingError::Provider {
            provider: provider.to_string(),
            message: "response carried no embedding".to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Ingest,
    Query,
}

/// Bounded pool that runs the embedder on blocking threads. Ingestion and queries draw
/// from separate permit sets so a burst of uploads cannot starve queries.
pub struct EmbeddingPool {
    embedder: Arc<dyn Embedder>,
    ingest_permits: Arc<Semaphore>,
    query_permits: Arc<Semaphore>,
    config: EmbeddingPoolConfig,
}

impl EmbeddingPool {
    pub fn new(embedder: Arc<dyn Embedder>, config: EmbeddingPoolConfig) -> Self {
        Self {
            embedder,
            ingest_permits: Arc::new(Semaphore::new(config.ingest_workers.max(1))),
            query_permits: Arc::new(Semaphore::new(config.query_workers.max(1))),
            config,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    pub fn provider(&self) -> &str {
        self.embedder.name()
    }

    /// Embeds with bounded exponential backoff between attempts.
    pub async fn embed(&self, lane: Lane, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut attempt = 0usize;
        loop {
            match self.embed_once(lane, text).await {
                Ok(vector) => return Ok(vector),
                Err(error) => {
                    attempt += 1;
                    if attempt > self.config.retry.max_retries {
                        return Err(error);
                    }
                    let delay = self.config.retry.delay_for_attempt(attempt);
                    warn!(?lane, attempt, ?delay, %error, "embedding failed, retrying");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub async fn embed_all(&self, lane: Lane, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut tasks = tokio::task::JoinSet::new();
        for (index, text) in texts.iter().enumerate() {
            let pool = self.clone_handle();
            let text = text.clone();
            tasks.spawn(async move { (index, pool.embed(lane, &text).await) });
        }

        let mut vectors = vec![Vec::new(); texts.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, result) = joined.map_err(|error| EmbeddingError::Worker(error.to_string()))?;
            vectors[index] = result?;
        }
        Ok(vectors)
    }

    async fn embed_once(&self, lane: Lane, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let permits = match lane {
            Lane::Ingest => &self.ingest_permits,
            Lane::Query => &self.query_permits,
        };
        let permit = permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|error| EmbeddingError::Worker(error.to_string()))?;

        let embedder = Arc::clone(&self.embedder);
        let owned = text.to_string();
        // Held until the embedder returns, even when the caller stops waiting.
        let work = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            embedder.embed(&owned)
        });

        let vector = match tokio::time::timeout(self.config.timeout, work).await {
            Ok(joined) => joined.map_err(|error| EmbeddingError::Worker(error.to_string()))??,
            Err(_) => {
                return Err(EmbeddingError::Timeout {
                    after: self.config.timeout,
                })
            }
        };

        let expected = self.embedder.dimensions();
        if vector.len() != expected {
            return Err(EmbeddingError::Dimension {
                expected,
                actual: vector.len(),
            });
        }

        debug!(?lane, dimensions = expected, "embedded text");
        Ok(vector)
    }

    fn clone_handle(&self) -> Self {
        Self {
            embedder: Arc::clone(&self.embedder),
            ingest_permits: Arc::clone(&self.ingest_permits),
            query_permits: Arc::clone(&self.query_permits),
            config: self.config,
        }
    }
}

/// Cosine similarity, 0.0 when either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
