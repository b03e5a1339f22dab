//! SQLite-backed [`IndexStore`].
//!
//! Vectors are stored as little-endian `f32` BLOBs in `doc_chunks.embedding`
//! and ranked in Rust with [`cosine_similarity`] after a version-filtered scan.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{IngestError, Result};
use crate::models::{ChunkMetadata, ChunkRecord, SearchHit};

use super::{rank, IndexStore};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn metadata_error(err: serde_json::Error) -> IngestError {
    IngestError::Store {
        message: format!("chunk metadata: {}", err),
        transient: false,
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
    async fn insert(&self, record: &ChunkRecord) -> Result<()> {
        let metadata_json = serde_json::to_string(&record.metadata).map_err(metadata_error)?;

        sqlx::query(
            r#"
            INSERT INTO doc_chunks (id, url, chunk_number, version, title, content,
                                    metadata_json, filename, version_str, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(url, chunk_number, version) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                metadata_json = excluded.metadata_json,
                filename = excluded.filename,
                version_str = excluded.version_str,
                embedding = excluded.embedding,
                created_at = excluded.created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.url)
        .bind(record.chunk_number)
        .bind(record.version)
        .bind(&record.title)
        .bind(&record.content)
        .bind(&metadata_json)
        .bind(&record.metadata.filename)
        .bind(&record.metadata.version_str)
        .bind(vec_to_blob(&record.embedding))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_where(&self, filename: &str, version_str: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM doc_chunks WHERE filename = ? AND version_str = ?")
            .bind(filename)
            .bind(version_str)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn search(
        &self,
        query_vec: &[f32],
        version: i64,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let rows = sqlx::query(
            "SELECT url, title, content, embedding FROM doc_chunks WHERE version = ?",
        )
        .bind(version)
        .fetch_all(&self.pool)
        .await?;

        let hits = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                SearchHit {
                    url: row.get("url"),
                    title: row.get("title"),
                    content: row.get("content"),
                    similarity: cosine_similarity(query_vec, &blob_to_vec(&blob)),
                }
            })
            .collect();

        Ok(rank(hits, limit))
    }

    async fn records_for(&self, filename: &str, version_str: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT url, chunk_number, version, title, content, metadata_json, embedding
            FROM doc_chunks
            WHERE filename = ? AND version_str = ?
            ORDER BY chunk_number
            "#,
        )
        .bind(filename)
        .bind(version_str)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata_json");
                let metadata: ChunkMetadata =
                    serde_json::from_str(&metadata_json).map_err(metadata_error)?;
                let blob: Vec<u8> = row.get("embedding");
                Ok(ChunkRecord {
                    url: row.get("url"),
                    chunk_number: row.get("chunk_number"),
                    version: row.get("version"),
                    title: row.get("title"),
                    content: row.get("content"),
                    metadata,
                    embedding: blob_to_vec(&blob),
                })
            })
            .collect()
    }

    async fn count_by_version(&self) -> Result<Vec<(i64, u64)>> {
        let rows = sqlx::query(
            "SELECT version, COUNT(*) AS n FROM doc_chunks GROUP BY version ORDER BY version",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let n: i64 = row.get("n");
                (row.get::<i64, _>("version"), n as u64)
            })
            .collect())
    }
}
