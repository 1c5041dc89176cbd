use sqlx::SqlitePool;

use crate::error::Result;

/// Current on-disk layout of the corpus.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the corpus schema. Idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per chunk; `position` is the append order.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            position INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            source_path TEXT NOT NULL,
            page_number INTEGER NOT NULL,
            ingested_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source_path)")
        .execute(pool)
        .await?;

    sqlx::query("INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)")
        .bind(SCHEMA_VERSION.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Read the schema version recorded in the corpus file.
pub async fn schema_version(pool: &SqlitePool) -> Result<Option<i64>> {
    let value: Option<String> =
        sqlx::query_scalar("SELECT value FROM meta WHERE key = 'schema_version'")
            .fetch_optional(pool)
            .await?;
    Ok(value.and_then(|v| v.parse().ok()))
}
