use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand, ValueEnum};
use doc_retrieval_core::{
    chunk_pages, ingest_folder_best_effort, ingest_path, parse_document, CharacterNgramEmbedder,
    ChunkingConfig, ContextOutcome, DocumentKind, EmbeddingPoolConfig, Embedder,
    EngineConfig, HttpEmbedder, HttpEmbedderConfig, IngestReceipt, RetrievalEngine,
    RetrievalMode, TermFrequencyExtractor, DEFAULT_EMBEDDING_DIMENSIONS,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "doc-retrieval", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    engine: EngineArgs,

    #[command(flatten)]
    embedding: EmbeddingArgs,
}

#[derive(Clone, Copy, ValueEnum)]
enum UnitArg {
    Chars,
    Words,
}

#[derive(Args)]
struct EngineArgs {
    /// Unit used for chunk size and overlap.
    #[arg(long, env = "DOC_RETRIEVAL_CHUNK_UNIT", value_enum, default_value = "chars", global = true)]
    chunk_unit: UnitArg,

    /// Maximum chunk size in chunk units.
    #[arg(long, env = "DOC_RETRIEVAL_CHUNK_SIZE", default_value = "1000", global = true)]
    chunk_size: usize,

    /// Overlap between consecutive chunks in chunk units.
    #[arg(long, env = "DOC_RETRIEVAL_CHUNK_OVERLAP", default_value = "200", global = true)]
    chunk_overlap: usize,

    /// Maximum characters in the assembled context.
    #[arg(long, env = "DOC_RETRIEVAL_CONTEXT_BUDGET", default_value = "4000", global = true)]
    context_budget: usize,

    /// Concurrent embedding calls reserved for ingestion.
    #[arg(long, env = "DOC_RETRIEVAL_INGEST_WORKERS", default_value = "4", global = true)]
    ingest_workers: usize,

    /// Concurrent embedding calls reserved for queries.
    #[arg(long, env = "DOC_RETRIEVAL_QUERY_WORKERS", default_value = "2", global = true)]
    query_workers: usize,
}

#[derive(Args)]
struct EmbeddingArgs {
    /// Embedding endpoint. The local trigram embedder is used when unset.
    #[arg(long, env = "EMBEDDING_ENDPOINT", global = true)]
    embedding_endpoint: Option<String>,

    #[arg(long, env = "EMBEDDING_API_KEY", hide_env_values = true, global = true)]
    embedding_api_key: Option<String>,

    #[arg(long, env = "EMBEDDING_MODEL", global = true)]
    embedding_model: Option<String>,

    /// Vector size returned by the embedding endpoint.
    #[arg(long, env = "EMBEDDING_DIMENSIONS", default_value_t = DEFAULT_EMBEDDING_DIMENSIONS, global = true)]
    embedding_dimensions: usize,

    /// Per-call embedding timeout in seconds.
    #[arg(long, env = "EMBEDDING_TIMEOUT_SECS", default_value = "30", global = true)]
    embedding_timeout_secs: u64,
}

#[derive(Subcommand)]
enum Command {
    /// Parse and chunk a single file without indexing it.
    Chunks {
        #[arg(long)]
        file: PathBuf,
    },
    /// Ingest files or folders and report each document's status.
    Index {
        /// Files or folders; folders are searched recursively.
        #[arg(long, required = true, num_args = 1..)]
        path: Vec<PathBuf>,
    },
    /// Ingest files or folders, then answer a question from them.
    Search {
        #[arg(long, required = true, num_args = 1..)]
        path: Vec<PathBuf>,
        #[arg(long)]
        query: String,
        /// Restrict the search to documents with this file name.
        #[arg(long)]
        document: Vec<String>,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        /// Print the response as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl EngineArgs {
    fn chunking(&self) -> ChunkingConfig {
        match self.chunk_unit {
            UnitArg::Chars => ChunkingConfig::chars(self.chunk_size, self.chunk_overlap),
            UnitArg::Words => ChunkingConfig::words(self.chunk_size, self.chunk_overlap),
        }
    }
}

impl EmbeddingArgs {
    fn embedder(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        let Some(endpoint) = &self.embedding_endpoint else {
            return Ok(Arc::new(CharacterNgramEmbedder::default()));
        };
        let embedder = HttpEmbedder::new(HttpEmbedderConfig {
            endpoint: endpoint.clone(),
            api_key: self.embedding_api_key.clone(),
            model: self.embedding_model.clone(),
            dimensions: self.embedding_dimensions,
            timeout: Duration::from_secs(self.embedding_timeout_secs),
        })
        .with_context(|| format!("invalid embedding endpoint {endpoint}"))?;
        Ok(Arc::new(embedder))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = EngineConfig::builder()
        .chunking(cli.engine.chunking())
        .max_context_chars(cli.engine.context_budget)
        .embedding(EmbeddingPoolConfig {
            ingest_workers: cli.engine.ingest_workers,
            query_workers: cli.engine.query_workers,
            timeout: Duration::from_secs(cli.embedding.embedding_timeout_secs),
            ..EmbeddingPoolConfig::default()
        })
        .build()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "doc-retrieval boot"
    );

    match cli.command {
        Command::Chunks { file } => print_chunks(&file, &config)?,
        Command::Index { path } => {
            let engine = RetrievalEngine::new(config, cli.embedding.embedder()?)?;
            for receipt in index_paths(&engine, &path).await? {
                println!(
                    "{} status={} chunks={}",
                    receipt.document_id, receipt.status, receipt.chunk_count
                );
            }
            for record in engine.list_documents().await {
                if let Some(error) = &record.last_error {
                    println!("{} {} failed: {error}", record.document_id, record.filename);
                }
            }
        }
        Command::Search {
            path,
            query,
            document,
            top_k,
            threshold,
            json,
        } => {
            let engine = RetrievalEngine::new(config, cli.embedding.embedder()?)?;
            index_paths(&engine, &path).await?;

            let mut search = engine.query(query);
            if let Some(top_k) = top_k {
                search = search.with_top_k(top_k);
            }
            if let Some(threshold) = threshold {
                search = search.with_threshold(threshold);
            }
            if !document.is_empty() {
                search = search.with_documents(resolve_documents(&engine, &document).await);
            }

            let response = engine.search(&search).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
                return Ok(());
            }

            println!("query: {}", response.retrieval.query);
            match response.retrieval.mode {
                RetrievalMode::Semantic => println!("mode: semantic"),
                RetrievalMode::KeywordFallback => println!(
                    "mode: keyword fallback ({})",
                    response.retrieval.degraded_reason.as_deref().unwrap_or("unknown")
                ),
            }
            for hit in &response.retrieval.hits {
                println!(
                    "score={:.4} chunk={} document={} page={}",
                    hit.score, hit.chunk_id, hit.document_name, hit.page
                );
            }

            match &response.context {
                ContextOutcome::Assembled(context) => {
                    println!("context:\n{}", context.text);
                    for source in &context.attributions {
                        println!(
                            "source: {} page {} score={:.4} \"{}\"",
                            source.document_name, source.page, source.score, source.preview
                        );
                    }
                }
                ContextOutcome::NoRelevantContext => {
                    println!("no relevant context found for this question");
                }
            }
        }
    }

    Ok(())
}

fn print_chunks(file: &Path, config: &EngineConfig) -> anyhow::Result<()> {
    let kind = DocumentKind::from_path(file)
        .with_context(|| format!("unsupported document type: {}", file.display()))?;
    let bytes = std::fs::read(file).with_context(|| format!("reading {}", file.display()))?;
    let pages = parse_document(&bytes, kind, config.max_document_bytes)?;
    let keywords = TermFrequencyExtractor::new(config.keywords_per_chunk)?;
    let drafts = chunk_pages(&pages, &config.chunking, &keywords)?;

    for draft in &drafts {
        println!(
            "#{} page={} chars={}..{} keywords={}",
            draft.ordinal,
            draft.page,
            draft.char_start,
            draft.char_end,
            draft.keywords.join(",")
        );
    }
    println!("{} chunks from {} pages", drafts.len(), pages.len());
    Ok(())
}

async fn index_paths(
    engine: &RetrievalEngine,
    paths: &[PathBuf],
) -> anyhow::Result<Vec<IngestReceipt>> {
    let mut receipts = Vec::new();
    for path in paths {
        if path.is_dir() {
            let report = ingest_folder_best_effort(engine, path).await?;
            for skipped in &report.skipped {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped document");
            }
            receipts.extend(report.receipts);
        } else {
            match ingest_path(engine, path).await {
                Ok(receipt) => receipts.push(receipt),
                Err(error) => warn!(path = %path.display(), %error, "skipped document"),
            }
        }
    }
    info!(indexed = receipts.len(), chunks = engine.indexed_chunk_count().await, "indexing finished");
    Ok(receipts)
}

/// Maps file names to document ids. Names that match nothing are passed through so the
/// engine reports them as unknown.
async fn resolve_documents(engine: &RetrievalEngine, names: &[String]) -> Vec<String> {
    let documents = engine.list_documents().await;
    let mut ids = Vec::new();
    for name in names {
        let matched = documents
            .iter()
            .filter(|record| &record.filename == name)
            .map(|record| record.document_id.clone())
            .collect::<Vec<_>>();
        if matched.is_empty() {
            ids.push(name.clone());
        } else {
            ids.extend(matched);
        }
    }
    ids
}
