//! Append-only, disk-persisted corpus of chunks.
//!
//! The corpus lives in a single SQLite file (see [`crate::migrate`]) with an
//! explicit column per [`Chunk`] field. It is the ground truth from which the
//! lexical and semantic indexes are rebuilt.
//!
//! # Append safety
//!
//! Appends are serialized by an in-process async mutex and written in one
//! transaction, so two concurrent ingestions can never lose each other's
//! chunks and a reader never observes half of an append.
//!
//! # Versioning
//!
//! The corpus only grows, so its chunk count doubles as a version stamp:
//! [`CorpusStore::version`] changes exactly when an append lands, including
//! appends made by another process against the same file.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::{Mutex, OnceCell};

use crate::db;
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{Chunk, ChunkMetadata};

/// Summary of what has been ingested.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CorpusStats {
    pub chunks: usize,
    pub sources: usize,
    pub last_ingested_at: Option<DateTime<Utc>>,
}

pub struct CorpusStore {
    path: PathBuf,
    pool: OnceCell<SqlitePool>,
    append_lock: Mutex<()>,
}

impl CorpusStore {
    /// Point at a corpus file. Nothing is created until the first append.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool: OnceCell::new(),
            append_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the corpus file and schema if they do not exist yet.
    pub async fn init(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool
            .get_or_try_init(|| async {
                let pool = db::connect(&self.path).await?;
                migrate::run_migrations(&pool).await?;
                match migrate::schema_version(&pool).await? {
                    Some(found) if found != migrate::SCHEMA_VERSION => {
                        Err(Error::Persistence(format!(
                            "{} has schema version {}, expected {}",
                            self.path.display(),
                            found,
                            migrate::SCHEMA_VERSION
                        )))
                    }
                    _ => Ok(pool),
                }
            })
            .await
    }

    /// The pool, unless no corpus file has ever been written.
    async fn existing_pool(&self) -> Result<Option<&SqlitePool>> {
        if self.pool.get().is_none() {
            let exists = tokio::fs::try_exists(&self.path)
                .await
                .map_err(Error::persistence)?;
            if !exists {
                return Ok(None);
            }
        }
        self.pool().await.map(Some)
    }

    /// Append chunks, returning the corpus size afterwards.
    pub async fn append(&self, chunks: &[Chunk]) -> Result<usize> {
        let _guard = self.append_lock.lock().await;
        let pool = self.pool().await?;

        let ingested_at = Utc::now().timestamp();
        let mut tx = pool.begin().await?;
        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (text, source_path, page_number, ingested_at) VALUES (?, ?, ?, ?)",
            )
            .bind(&chunk.text)
            .bind(&chunk.metadata.source_path)
            .bind(i64::from(chunk.metadata.page_number))
            .bind(ingested_at)
            .execute(&mut *tx)
            .await?;
        }
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(
            appended = chunks.len(),
            total,
            path = %self.path.display(),
            "corpus append committed"
        );
        Ok(total as usize)
    }

    /// Load every chunk in append order.
    ///
    /// Fails with [`Error::NotIngested`] if nothing has ever been appended.
    pub async fn load_all(&self) -> Result<Vec<Chunk>> {
        let pool = self.existing_pool().await?.ok_or(Error::NotIngested)?;
        let rows = sqlx::query(
            "SELECT text, source_path, page_number FROM chunks ORDER BY position ASC",
        )
        .fetch_all(pool)
        .await?;

        if rows.is_empty() {
            return Err(Error::NotIngested);
        }

        Ok(rows
            .iter()
            .map(|row| {
                let page: i64 = row.get("page_number");
                Chunk {
                    text: row.get("text"),
                    metadata: ChunkMetadata {
                        source_path: row.get("source_path"),
                        page_number: u32::try_from(page).unwrap_or(0),
                    },
                }
            })
            .collect())
    }

    /// Number of chunks persisted (0 if the corpus does not exist).
    pub async fn count(&self) -> Result<usize> {
        let Some(pool) = self.existing_pool().await? else {
            return Ok(0);
        };
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(pool)
            .await?;
        Ok(n as usize)
    }

    /// Version stamp that changes whenever the corpus grows.
    pub async fn version(&self) -> Result<u64> {
        self.count().await.map(|n| n as u64)
    }

    pub async fn stats(&self) -> Result<CorpusStats> {
        let Some(pool) = self.existing_pool().await? else {
            return Ok(CorpusStats {
                chunks: 0,
                sources: 0,
                last_ingested_at: None,
            });
        };
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS chunks,
                   COUNT(DISTINCT source_path) AS sources,
                   MAX(ingested_at) AS last_ingested_at
            FROM chunks
            "#,
        )
        .fetch_one(pool)
        .await?;

        let chunks: i64 = row.get("chunks");
        let sources: i64 = row.get("sources");
        let last: Option<i64> = row.get("last_ingested_at");
        Ok(CorpusStats {
            chunks: chunks as usize,
            sources: sources as usize,
            last_ingested_at: last.and_then(|ts| DateTime::from_timestamp(ts, 0)),
        })
    }
}
