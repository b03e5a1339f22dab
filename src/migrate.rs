//! Schema for the SQLite index.
//!
//! One table, `doc_chunks`, keyed by `(url, chunk_number, version)`. The
//! `filename` and `version_str` columns duplicate the metadata fields so
//! delete-by-match is an indexed lookup.

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::error::Result;

/// Create tables and indexes. Safe to run any number of times.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS doc_chunks (
            id TEXT PRIMARY KEY,
            url TEXT NOT NULL,
            chunk_number INTEGER NOT NULL,
            version INTEGER NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            filename TEXT NOT NULL,
            version_str TEXT NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(url, chunk_number, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_doc_chunks_file ON doc_chunks(filename, version_str)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_doc_chunks_version ON doc_chunks(version)")
        .execute(pool)
        .await?;

    Ok(())
}

/// `dh init`
pub async fn run_migrations(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply(&pool).await?;
    pool.close().await;

    println!("Database initialized at {}", config.db.path.display());
    Ok(())
}
