//! Index Store abstraction.
//!
//! The [`IndexStore`] trait is everything the pipeline needs from the
//! vector index: keyed inserts, delete-by-match on `(filename, version_str)`,
//! and similarity search within one release. Two backends implement it:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`SqliteStore`](sqlite::SqliteStore) | Production, one `doc_chunks` table |
//! | [`InMemoryStore`](memory::InMemoryStore) | Tests and dry runs |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkRecord, SearchHit};

#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Write one record. A record with the same `(url, chunk_number,
    /// version)` key is replaced, never duplicated.
    async fn insert(&self, record: &ChunkRecord) -> Result<()>;

    /// Delete every record whose metadata carries this filename and version
    /// string. Returns the number of records removed.
    async fn delete_where(&self, filename: &str, version_str: &str) -> Result<u64>;

    /// Records of one release ranked by descending cosine similarity to
    /// `query_vec`, at most `limit` of them.
    async fn search(&self, query_vec: &[f32], version: i64, limit: usize)
        -> Result<Vec<SearchHit>>;

    /// Records for one document, in chunk order.
    async fn records_for(&self, filename: &str, version_str: &str) -> Result<Vec<ChunkRecord>>;

    /// `(version, record count)` pairs, ascending by version.
    async fn count_by_version(&self) -> Result<Vec<(i64, u64)>>;
}

/// Sort scored hits best-first and keep `limit` of them.
pub(crate) fn rank(mut hits: Vec<SearchHit>, limit: usize) -> Vec<SearchHit> {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(limit);
    hits
}
