//! Ingestion orchestration: bytes → pages → chunks → corpus append.
//!
//! A document is fully extracted and split before the corpus is touched,
//! so a parse failure leaves the corpus unchanged. The append itself is
//! atomic (see [`CorpusStore::append`]).
//!
//! The CLI entry point [`run_ingest`] accepts a single file or a directory;
//! directories are walked and filtered by the supported extensions.

use anyhow::{bail, Context};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::split_pages;
use crate::config::{ChunkingConfig, Config};
use crate::corpus::CorpusStore;
use crate::error::{Error, Result};
use crate::extract::{extract_pages, DocumentKind};
use crate::models::IngestReport;

/// Globs selecting ingestible files when walking a directory.
pub const DOCUMENT_GLOBS: [&str; 4] = ["**/*.pdf", "**/*.docx", "**/*.txt", "**/*.md"];

/// Ingest one document.
///
/// `source_path` is recorded on every chunk and also decides the document
/// kind by extension.
pub async fn ingest_document(
    store: &CorpusStore,
    chunking: &ChunkingConfig,
    source_path: &str,
    bytes: Vec<u8>,
) -> Result<IngestReport> {
    let kind = DocumentKind::from_filename(source_path)?;

    let name = source_path.to_string();
    let pages = tokio::task::spawn_blocking(move || extract_pages(&bytes, kind, &name))
        .await
        .map_err(|e| Error::parse(source_path, format!("extraction task failed: {}", e)))??;

    let chunks = split_pages(&pages, source_path, chunking);
    if chunks.is_empty() {
        return Err(Error::EmptyDocument(source_path.to_string()));
    }

    let corpus_total = store.append(&chunks).await?;
    tracing::info!(
        source = source_path,
        pages = pages.len(),
        chunks = chunks.len(),
        corpus_total,
        "document ingested"
    );

    Ok(IngestReport {
        chunks: chunks.len(),
        corpus_total,
    })
}

fn document_globset() -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in DOCUMENT_GLOBS {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob pattern: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

/// Ingestible files under `root`, sorted for deterministic ordering.
pub fn collect_documents(root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let include = document_globset()?;
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if include.is_match(relative) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// `lexcase ingest <PATH>`: ingest a file, or every document under a directory.
pub async fn run_ingest(config: &Config, path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    let store = CorpusStore::open(&config.corpus.path);
    let files = if path.is_dir() {
        collect_documents(path)?
    } else {
        vec![path.to_path_buf()]
    };

    if files.is_empty() {
        println!("No documents found under {}", path.display());
        return Ok(());
    }

    let mut ingested = 0usize;
    let mut failed = 0usize;
    let mut total = 0usize;
    for file in &files {
        let bytes = tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let source = file.to_string_lossy().to_string();
        match ingest_document(&store, &config.chunking, &source, bytes).await {
            Ok(report) => {
                println!("  {} → {} chunks", source, report.chunks);
                ingested += 1;
                total = report.corpus_total;
            }
            Err(e) if e.is_client_error() => {
                eprintln!("  {} skipped: {}", source, e);
                failed += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to ingest {}", source)),
        }
    }

    println!(
        "Ingested {} document(s), {} skipped. Corpus now holds {} chunks.",
        ingested,
        failed,
        if ingested > 0 { total } else { store.count().await? }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir) -> CorpusStore {
        CorpusStore::open(tmp.path().join("corpus.sqlite"))
    }

    #[tokio::test]
    async fn test_ingest_text_document() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let report = ingest_document(
            &store,
            &ChunkingConfig::default(),
            "notes.txt",
            b"Consideration must move from the promisee.".to_vec(),
        )
        .await
        .unwrap();
        assert_eq!(report.chunks, 1);
        assert_eq!(report.corpus_total, 1);

        let chunks = store.load_all().await.unwrap();
        assert_eq!(chunks[0].metadata.source_path, "notes.txt");
        assert_eq!(chunks[0].metadata.page_number, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_leaves_corpus_untouched() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        ingest_document(&store, &ChunkingConfig::default(), "a.txt", b"first".to_vec())
            .await
            .unwrap();

        let err = ingest_document(
            &store,
            &ChunkingConfig::default(),
            "broken.pdf",
            b"%PDF-garbage".to_vec(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::IngestionParse { .. }));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_and_empty_documents_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp);
        let cfg = ChunkingConfig::default();
        assert!(matches!(
            ingest_document(&store, &cfg, "image.png", vec![1, 2, 3]).await,
            Err(Error::UnsupportedDocument(_))
        ));
        assert!(matches!(
            ingest_document(&store, &cfg, "blank.txt", b"   \n ".to_vec()).await,
            Err(Error::EmptyDocument(_))
        ));
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[test]
    fn test_collect_documents_filters_by_extension() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("cases/2020")).unwrap();
        std::fs::write(tmp.path().join("top.TXT"), "x").unwrap();
        std::fs::write(tmp.path().join("cases/2020/judgment.md"), "x").unwrap();
        std::fs::write(tmp.path().join("cases/scan.png"), "x").unwrap();

        let files = collect_documents(tmp.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"top.TXT".to_string()));
        assert!(names.contains(&"judgment.md".to_string()));
    }
}
