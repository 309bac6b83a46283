use doc_retrieval_core::{
    CharacterNgramEmbedder, ChunkingConfig, ContextOutcome, DocumentKind, DocumentStatus,
    EmbeddingError, EmbeddingPoolConfig, Embedder, EngineConfig, IndexConsistencyError,
    IngestError, ParseError, QueryError, RemoveOutcome, RetrievalEngine, RetrievalMode,
    RetryPolicy,
};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const DIMENSIONS: usize = 96;

const VOCABULARY: [&str; 12] = [
    "pump", "valve", "pressure", "seal", "gasket", "turbine", "bearing", "filter", "flow",
    "motor", "shaft", "coupling",
];

/// Trigram embedder that can be switched off, or made to fail on texts containing a marker.
struct ControlledEmbedder {
    inner: CharacterNgramEmbedder,
    down: AtomicBool,
    poison: Option<&'static str>,
}

impl ControlledEmbedder {
    fn healthy() -> Self {
        Self {
            inner: CharacterNgramEmbedder {
                dimensions: DIMENSIONS,
            },
            down: AtomicBool::new(false),
            poison: None,
        }
    }

    fn poisoned(marker: &'static str) -> Self {
        Self {
            poison: Some(marker),
            ..Self::healthy()
        }
    }
}

impl Embedder for ControlledEmbedder {
    fn name(&self) -> &str {
        "controlled"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let poisoned = self.poison.is_some_and(|marker| text.contains(marker));
        if self.down.load(Ordering::SeqCst) || poisoned {
            return Err(EmbeddingError::Provider {
                provider: "controlled".to_string(),
                message: "unavailable".to_string(),
            });
        }
        self.inner.embed(text)
    }
}

fn config(chunking: ChunkingConfig) -> EngineConfig {
    EngineConfig::builder()
        .chunking(chunking)
        .similarity_threshold(0.0)
        .embedding(EmbeddingPoolConfig {
            retry: RetryPolicy::none(),
            ..EmbeddingPoolConfig::default()
        })
        .build()
        .unwrap()
}

fn engine_with(embedder: Arc<ControlledEmbedder>, chunking: ChunkingConfig) -> RetrievalEngine {
    RetrievalEngine::new(config(chunking), embedder).unwrap()
}

fn words(count: usize, offset: usize) -> String {
    (0..count)
        .map(|index| VOCABULARY[(index + offset) % VOCABULARY.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

#[tokio::test]
async fn fifteen_hundred_word_upload_becomes_four_ready_chunks() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::words(500, 50),
    );

    let receipt = engine
        .ingest("manual", "manual.txt", words(1_500, 0).into_bytes(), DocumentKind::Text)
        .await
        .unwrap();

    assert_eq!(receipt.status, DocumentStatus::Ready);
    assert_eq!(receipt.chunk_count, 4);

    let chunks = engine.document_chunks("manual").await;
    let ordinals = chunks
        .iter()
        .map(|chunk| chunk.chunk_id.ordinal)
        .collect::<Vec<_>>();
    assert_eq!(ordinals, vec![0, 1, 2, 3]);
    assert!(chunks.iter().all(|chunk| chunk.page == 1));
    assert_eq!(
        engine.document("manual").await.map(|record| record.status),
        Some(DocumentStatus::Ready)
    );
}

#[tokio::test]
async fn unfiltered_query_ranks_across_documents() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );
    engine
        .ingest(
            "report-a",
            "report-a.txt",
            b"The key findings show pump pressure dropped after the seal failed.".to_vec(),
            DocumentKind::Text,
        )
        .await
        .unwrap();
    engine
        .ingest(
            "report-b",
            "report-b.txt",
            b"Key findings of the audit: turbine bearings wear faster in winter.".to_vec(),
            DocumentKind::Text,
        )
        .await
        .unwrap();

    let query = engine.query("key findings").with_threshold(0.0);
    let response = engine.search(&query).await.unwrap();
    let hits = &response.retrieval.hits;

    assert_eq!(response.retrieval.mode, RetrievalMode::Semantic);
    assert_eq!(hits.len(), 2);
    assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));
    assert!(hits.iter().all(|hit| hit.score >= query.similarity_threshold));

    let context = response.context.context().unwrap();
    let names = context
        .attributions
        .iter()
        .map(|source| source.document_name.as_str())
        .collect::<BTreeSet<_>>();
    assert_eq!(names, BTreeSet::from(["report-a.txt", "report-b.txt"]));
}

#[tokio::test]
async fn empty_pdf_fails_without_touching_the_index() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );

    let error = engine
        .ingest("blank", "blank.pdf", Vec::new(), DocumentKind::Pdf)
        .await
        .unwrap_err();

    assert!(matches!(error, IngestError::Parse(ParseError::Empty)));
    let record = engine.document("blank").await.unwrap();
    assert_eq!(record.status, DocumentStatus::Failed);
    assert!(record.last_error.is_some());
    assert!(engine.document_chunks("blank").await.is_empty());
    assert_eq!(engine.indexed_chunk_count().await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_uploads_index_every_chunk_once() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::words(100, 10),
    );

    let first = engine.clone();
    let second = engine.clone();
    let (left, right) = tokio::join!(
        first.ingest("left", "left.txt", words(400, 0).into_bytes(), DocumentKind::Text),
        second.ingest("right", "right.txt", words(400, 5).into_bytes(), DocumentKind::Text),
    );

    assert_eq!(left.unwrap().chunk_count, 5);
    assert_eq!(right.unwrap().chunk_count, 5);
    assert_eq!(engine.indexed_chunk_count().await, 10);

    let mut ids = engine.document_chunks("left").await;
    ids.extend(engine.document_chunks("right").await);
    let unique = ids
        .iter()
        .map(|chunk| chunk.chunk_id.clone())
        .collect::<BTreeSet<_>>();
    assert_eq!(unique.len(), 10);

    for record in engine.list_documents().await {
        assert_eq!(record.status, DocumentStatus::Ready);
    }
}

#[tokio::test]
async fn embedder_outage_degrades_to_keyword_search() {
    let embedder = Arc::new(ControlledEmbedder::healthy());
    let engine = engine_with(Arc::clone(&embedder), ChunkingConfig::default());
    engine
        .ingest(
            "pumps",
            "pumps.txt",
            b"Hydraulic pump pressure must be checked before every start.".to_vec(),
            DocumentKind::Text,
        )
        .await
        .unwrap();
    engine
        .ingest(
            "bread",
            "bread.txt",
            b"Bake the bread in a hot oven until golden.".to_vec(),
            DocumentKind::Text,
        )
        .await
        .unwrap();

    embedder.down.store(true, Ordering::SeqCst);
    let response = engine.search(&engine.query("pump pressure")).await.unwrap();

    assert_eq!(response.retrieval.mode, RetrievalMode::KeywordFallback);
    assert!(response.retrieval.is_degraded());
    assert_eq!(response.retrieval.hits.len(), 1);
    assert_eq!(response.retrieval.hits[0].document_id(), "pumps");
}

#[tokio::test]
async fn failed_embedding_leaves_no_chunks_behind() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::poisoned("POISON")),
        ChunkingConfig::words(20, 2),
    );
    let text = format!("{} POISON {}", words(30, 0), words(30, 3));

    let error = engine
        .ingest("doc", "doc.txt", text.into_bytes(), DocumentKind::Text)
        .await
        .unwrap_err();

    assert!(matches!(
        error,
        IngestError::Index(IndexConsistencyError::EmbeddingFailed { .. })
    ));
    assert_eq!(
        engine.document("doc").await.map(|record| record.status),
        Some(DocumentStatus::Failed)
    );
    assert!(engine.document_chunks("doc").await.is_empty());

    let scoped = engine.query("pump valve").with_documents(["doc"]);
    let response = engine.search(&scoped).await.unwrap();
    assert!(response.retrieval.hits.is_empty());
    assert_eq!(response.context, ContextOutcome::NoRelevantContext);
}

#[tokio::test]
async fn failed_reupload_removes_the_previous_version() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::poisoned("POISON")),
        ChunkingConfig::default(),
    );
    engine
        .ingest("doc", "doc.txt", words(50, 0).into_bytes(), DocumentKind::Text)
        .await
        .unwrap();
    assert!(engine.indexed_chunk_count().await > 0);

    let result = engine
        .ingest("doc", "doc.txt", b"POISON pill".to_vec(), DocumentKind::Text)
        .await;

    assert!(result.is_err());
    assert_eq!(engine.indexed_chunk_count().await, 0);
}

#[tokio::test]
async fn filtered_results_stay_inside_the_filter() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::words(40, 5),
    );
    for (offset, id) in ["alpha", "bravo", "charlie"].iter().enumerate() {
        engine
            .ingest(*id, format!("{id}.txt"), words(120, offset).into_bytes(), DocumentKind::Text)
            .await
            .unwrap();
    }

    let allowed = BTreeSet::from(["alpha", "charlie"]);
    let query = engine
        .query("pump pressure valve")
        .with_documents(allowed.iter().copied())
        .with_top_k(50);
    let response = engine.search(&query).await.unwrap();

    assert!(!response.retrieval.hits.is_empty());
    assert!(response
        .retrieval
        .hits
        .iter()
        .all(|hit| allowed.contains(hit.document_id())));
}

#[tokio::test]
async fn equal_scores_are_ordered_by_chunk_id() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );
    let text = b"Replace the coupling when the shaft vibrates.".to_vec();
    engine
        .ingest("twin-b", "b.txt", text.clone(), DocumentKind::Text)
        .await
        .unwrap();
    engine
        .ingest("twin-a", "a.txt", text, DocumentKind::Text)
        .await
        .unwrap();

    let response = engine.search(&engine.query("shaft coupling")).await.unwrap();
    let hits = &response.retrieval.hits;

    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].score, hits[1].score);
    assert_eq!(hits[0].document_id(), "twin-a");
    assert_eq!(hits[1].document_id(), "twin-b");
}

#[tokio::test]
async fn reingesting_identical_content_is_idempotent() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::words(60, 6),
    );
    let bytes = words(300, 0).into_bytes();

    let first = engine
        .ingest("doc", "doc.txt", bytes.clone(), DocumentKind::Text)
        .await
        .unwrap();
    let before = engine.document_chunks("doc").await;
    let second = engine
        .ingest("doc", "doc.txt", bytes, DocumentKind::Text)
        .await
        .unwrap();
    let after = engine.document_chunks("doc").await;

    assert_eq!(first, second);
    assert_eq!(before.len(), after.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.chunk_id, new.chunk_id);
        assert_eq!((old.char_start, old.char_end), (new.char_start, new.char_end));
        assert_eq!(old.text, new.text);
        assert_eq!(old.embedding, new.embedding);
    }
    assert_eq!(engine.indexed_chunk_count().await, after.len());
}

#[tokio::test]
async fn below_threshold_query_yields_no_relevant_context() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );
    engine
        .ingest("doc", "doc.txt", b"Pumps move fluid.".to_vec(), DocumentKind::Text)
        .await
        .unwrap();

    let query = engine.query("zzzz qqqq xxxx").with_threshold(0.99);
    let response = engine.search(&query).await.unwrap();

    assert!(response.retrieval.is_empty());
    assert_eq!(response.context, ContextOutcome::NoRelevantContext);
}

#[tokio::test]
async fn remove_drops_document_and_chunks() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );
    engine
        .ingest("doc", "doc.txt", b"Pumps move fluid.".to_vec(), DocumentKind::Text)
        .await
        .unwrap();

    assert_eq!(engine.remove("doc").await, RemoveOutcome::Removed { chunks: 1 });
    assert_eq!(engine.remove("doc").await, RemoveOutcome::NotFound);
    assert!(engine.document("doc").await.is_none());
    assert_eq!(engine.indexed_chunk_count().await, 0);

    let scoped = engine.query("pumps").with_documents(["doc"]);
    assert_eq!(
        engine.search(&scoped).await.unwrap_err(),
        QueryError::UnknownDocuments(vec!["doc".to_string()])
    );
}

#[tokio::test]
async fn invalid_queries_are_rejected() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::default(),
    );

    let zero = engine.query("pumps").with_top_k(0);
    assert_eq!(
        engine.search(&zero).await.unwrap_err(),
        QueryError::InvalidTopK(0)
    );
    assert_eq!(
        engine.search(&engine.query("   ")).await.unwrap_err(),
        QueryError::EmptyQuestion
    );
}

/// Blocks on texts containing a marker until the test releases it.
struct GatedEmbedder {
    inner: CharacterNgramEmbedder,
    marker: &'static str,
    entered: Arc<Notify>,
    release: Mutex<Receiver<()>>,
}

impl GatedEmbedder {
    fn new(marker: &'static str) -> (Arc<Self>, Sender<()>) {
        let (sender, receiver) = mpsc::channel();
        let embedder = Arc::new(Self {
            inner: CharacterNgramEmbedder {
                dimensions: DIMENSIONS,
            },
            marker,
            entered: Arc::new(Notify::new()),
            release: Mutex::new(receiver),
        });
        (embedder, sender)
    }
}

impl Embedder for GatedEmbedder {
    fn name(&self) -> &str {
        "gated"
    }

    fn dimensions(&self) -> usize {
        DIMENSIONS
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.contains(self.marker) {
            self.entered.notify_one();
            let release = self.release.lock().unwrap();
            release
                .recv()
                .map_err(|error| EmbeddingError::Worker(error.to_string()))?;
        }
        self.inner.embed(text)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn newer_upload_supersedes_an_ingest_in_flight() {
    let (embedder, release) = GatedEmbedder::new("OLDVERSION");
    let engine = RetrievalEngine::new(config(ChunkingConfig::default()), embedder.clone()).unwrap();

    let stale = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .ingest("doc", "doc.txt", b"OLDVERSION pump manual".to_vec(), DocumentKind::Text)
                .await
        })
    };
    embedder.entered.notified().await;

    let fresh = engine
        .ingest("doc", "doc.txt", b"Revised pump manual.".to_vec(), DocumentKind::Text)
        .await
        .unwrap();
    assert_eq!(fresh.status, DocumentStatus::Ready);

    release.send(()).unwrap();
    let outcome = stale.await.unwrap();
    assert!(matches!(outcome, Err(IngestError::Superseded(id)) if id == "doc"));

    let texts = engine
        .document_chunks("doc")
        .await
        .into_iter()
        .map(|chunk| chunk.text)
        .collect::<Vec<_>>();
    assert_eq!(texts, vec!["Revised pump manual.".to_string()]);
    assert_eq!(
        engine.document("doc").await.map(|record| record.status),
        Some(DocumentStatus::Ready)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn removal_supersedes_an_ingest_in_flight() {
    let (embedder, release) = GatedEmbedder::new("OLDVERSION");
    let engine = RetrievalEngine::new(config(ChunkingConfig::default()), embedder.clone()).unwrap();

    let stale = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .ingest("doc", "doc.txt", b"OLDVERSION pump manual".to_vec(), DocumentKind::Text)
                .await
        })
    };
    embedder.entered.notified().await;

    assert_eq!(engine.remove("doc").await, RemoveOutcome::Removed { chunks: 0 });
    release.send(()).unwrap();

    let outcome = stale.await.unwrap();
    assert!(matches!(outcome, Err(IngestError::Superseded(_))));
    assert!(engine.document("doc").await.is_none());
    assert_eq!(engine.indexed_chunk_count().await, 0);
}

#[tokio::test]
async fn abandoned_ingest_still_completes() {
    let engine = engine_with(
        Arc::new(ControlledEmbedder::healthy()),
        ChunkingConfig::words(50, 5),
    );

    let abandoned = tokio::time::timeout(
        Duration::from_micros(1),
        engine.ingest("doc", "doc.txt", words(2_000, 0).into_bytes(), DocumentKind::Text),
    )
    .await;
    drop(abandoned);

    let mut status = None;
    for _ in 0..200 {
        status = engine.document("doc").await.map(|record| record.status);
        if status == Some(DocumentStatus::Ready) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    assert_eq!(status, Some(DocumentStatus::Ready));
    let record = engine.document("doc").await.unwrap();
    assert!(record.chunk_count > 0);
    assert_eq!(engine.indexed_chunk_count().await, record.chunk_count);
}
