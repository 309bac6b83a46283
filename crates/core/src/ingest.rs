use crate::engine::RetrievalEngine;
use crate::error::{IngestError, Result};
use crate::models::{DocumentKind, IngestReceipt};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

/// Every supported document under `folder`, recursively, in path order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if DocumentKind::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Stable id for a document loaded from disk, so re-indexing a folder replaces earlier
/// versions instead of duplicating them.
pub fn document_id_for_path(path: &Path) -> String {
    digest_bytes(path.to_string_lossy().as_bytes())
}

pub async fn ingest_path(
    engine: &RetrievalEngine,
    path: &Path,
) -> Result<IngestReceipt> {
    let kind = DocumentKind::from_path(path).ok_or_else(|| {
        IngestError::InvalidArgument(format!("unsupported document type: {}", path.display()))
    })?;
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();
    let bytes = tokio::fs::read(path).await?;

    engine
        .ingest(document_id_for_path(path), filename, bytes, kind)
        .await
}

#[derive(Debug)]
pub struct SkippedDocument {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub receipts: Vec<IngestReceipt>,
    pub skipped: Vec<SkippedDocument>,
}

/// Ingests every supported document under `folder`. Documents that fail are reported
/// as skipped and do not stop the rest.
pub async fn ingest_folder_best_effort(
    engine: &RetrievalEngine,
    folder: &Path,
) -> Result<IngestionReport> {
    let files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no supported documents found in {}",
            folder.display()
        )));
    }

    let mut report = IngestionReport::default();
    for path in files {
        match ingest_path(engine, &path).await {
            Ok(receipt) => report.receipts.push(receipt),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping document");
                report.skipped.push(SkippedDocument {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        folder = %folder.display(),
        indexed = report.receipts.len(),
        skipped = report.skipped.len(),
        "folder ingestion finished"
    );
    Ok(report)
}
