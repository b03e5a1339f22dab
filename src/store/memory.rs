//! In-memory [`IndexStore`] for tests and dry runs.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over every record of the requested release.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{ChunkRecord, SearchHit};

use super::{rank, IndexStore};

#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Vec<ChunkRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<ChunkRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<ChunkRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn same_key(a: &ChunkRecord, b: &ChunkRecord) -> bool {
    a.url == b.url && a.chunk_number == b.chunk_number && a.version == b.version
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn insert(&self, record: &ChunkRecord) -> Result<()> {
        let mut records = self.write();
        match records.iter_mut().find(|r| same_key(r, record)) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    async fn delete_where(&self, filename: &str, version_str: &str) -> Result<u64> {
        let mut records = self.write();
        let before = records.len();
        records.retain(|r| {
            !(r.metadata.filename == filename && r.metadata.version_str == version_str)
        });
        Ok((before - records.len()) as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        version: i64,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        let hits = self
            .read()
            .iter()
            .filter(|r| r.version == version)
            .map(|r| SearchHit {
                url: r.url.clone(),
                title: r.title.clone(),
                content: r.content.clone(),
                similarity: cosine_similarity(query_vec, &r.embedding),
            })
            .collect();
        Ok(rank(hits, limit))
    }

    async fn records_for(&self, filename: &str, version_str: &str) -> Result<Vec<ChunkRecord>> {
        let mut found: Vec<ChunkRecord> = self
            .read()
            .iter()
            .filter(|r| r.metadata.filename == filename && r.metadata.version_str == version_str)
            .cloned()
            .collect();
        found.sort_by_key(|r| r.chunk_number);
        Ok(found)
    }

    async fn count_by_version(&self) -> Result<Vec<(i64, u64)>> {
        let mut counts: BTreeMap<i64, u64> = BTreeMap::new();
        for record in self.read().iter() {
            *counts.entry(record.version).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}
