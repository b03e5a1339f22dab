//! Ingestion orchestrator.
//!
//! Drives one source file at a time through normalize → chunk → embed →
//! index, and owns the batch contract with the [`CacheStore`]:
//!
//! ```text
//! prior = cache.read()
//! for each file: process (embed/delete/insert calls retried when transient)
//! all ok  → cache.replace(next snapshot)
//! any err → cache.rollback(prior), surface BatchFailed { path, cause }
//! ```
//!
//! Index writes made for files earlier in a failed batch are not undone.
//! They are correct, and the rolled-back cache makes the next run
//! re-process them, which upsert mode absorbs.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheSnapshot, CacheStore};
use crate::changes::Detection;
use crate::chunk::{chunk_markdown, chunk_title, ChunkSettings};
use crate::embedding::{prepare_input, EmbeddingProvider};
use crate::error::{IngestError, Result};
use crate::layout::{document_url, SourceLayout};
use crate::models::{
    Chunk, ChunkMetadata, ChunkRecord, IngestMode, NormalizedDocument, CHUNK_SOURCE,
};
use crate::normalize::{normalize_file, Normalizer};
use crate::retry::RetryPolicy;
use crate::store::IndexStore;

/// Default prefix for document deep links.
pub const DEFAULT_BASE_URL: &str = "https://www.odoo.com/documentation";

/// Cooperative cancellation, checked before each file starts.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Work for one batch: files to (re)index, files whose records must go, and
/// the snapshot to commit once all of it succeeds.
#[derive(Debug, Clone, Default)]
pub struct BatchPlan {
    pub index: Vec<PathBuf>,
    pub remove: Vec<PathBuf>,
    pub next_snapshot: CacheSnapshot,
}

impl BatchPlan {
    pub fn from_detection(detection: &Detection) -> Self {
        Self {
            index: detection.changes.to_index(),
            remove: detection.changes.removed.iter().cloned().collect(),
            next_snapshot: detection.current.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub files_indexed: usize,
    pub files_removed: usize,
    pub chunks_written: usize,
    pub records_deleted: u64,
}

/// Pipeline wiring. Collaborators are borrowed; the caller owns them.
pub struct Ingestor<'a> {
    layout: &'a SourceLayout,
    normalizer: &'a dyn Normalizer,
    embedder: &'a dyn EmbeddingProvider,
    store: &'a dyn IndexStore,
    chunking: ChunkSettings,
    retry: RetryPolicy,
    base_url: String,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        layout: &'a SourceLayout,
        normalizer: &'a dyn Normalizer,
        embedder: &'a dyn EmbeddingProvider,
        store: &'a dyn IndexStore,
    ) -> Self {
        Self {
            layout,
            normalizer,
            embedder,
            store,
            chunking: ChunkSettings::default(),
            retry: RetryPolicy::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_chunking(mut self, chunking: ChunkSettings) -> Self {
        self.chunking = chunking;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn layout(&self) -> &SourceLayout {
        self.layout
    }

    /// Normalize a raw source file, then index it.
    pub async fn ingest_source(&self, raw_path: &Path, mode: IngestMode) -> Result<usize> {
        let doc = normalize_file(self.layout, self.normalizer, raw_path)?;
        self.index_document(&doc, mode).await
    }

    /// Chunk, embed and store one normalized document. Returns the number of
    /// records written.
    ///
    /// Every chunk is embedded before the index is touched, so an embedding
    /// failure leaves the document's old records in place.
    pub async fn index_document(
        &self,
        doc: &NormalizedDocument,
        mode: IngestMode,
    ) -> Result<usize> {
        let chunks = chunk_markdown(&doc.text, &self.chunking);
        debug!(file = %doc.key, chunks = chunks.len(), "chunked");

        let processed_at = Utc::now().to_rfc3339();
        let mut records = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let input = prepare_input(&chunk.content);
            let embedding = self
                .retry
                .run("embed", || self.embedder.embed(&input))
                .await?;
            records.push(self.build_record(doc, chunk, embedding, &processed_at));
        }

        if mode == IngestMode::Upsert {
            let deleted = self
                .retry
                .run("delete", || {
                    self.store.delete_where(&doc.key, &doc.version.label)
                })
                .await?;
            debug!(file = %doc.key, version = %doc.version, deleted, "cleared old records");
        }

        for record in &records {
            self.retry
                .run("insert", || self.store.insert(record))
                .await?;
        }

        info!(
            file = %doc.key,
            version = %doc.version,
            chunks = records.len(),
            mode = %mode,
            "indexed"
        );
        Ok(records.len())
    }

    /// Delete the records of a source file that no longer exists, along with
    /// its normalized copy. Returns the number of records deleted.
    ///
    /// A path outside the current raw tree (left in the cache after the tree
    /// moved) cannot be mapped to a document key. It is logged and dropped
    /// with nothing deleted.
    pub async fn remove_source(&self, raw_path: &Path) -> Result<u64> {
        if !self.layout.owns_raw(raw_path) {
            warn!(
                path = %raw_path.display(),
                "cached path is outside the source tree, dropping it"
            );
            return Ok(0);
        }
        let (version, normalized) = self.layout.normalized_path_for(raw_path)?;
        let key = self.layout.document_key(&normalized, &version)?;

        let deleted = self
            .retry
            .run("delete", || self.store.delete_where(&key, &version.label))
            .await?;

        match std::fs::remove_file(&normalized) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(IngestError::io(&normalized, e)),
        }

        info!(file = %key, version = %version, deleted, "removed");
        Ok(deleted)
    }

    /// Apply a plan and commit or roll back the cache.
    ///
    /// Cancellation is honored before each file and takes the failure path.
    pub async fn process_batch(
        &self,
        cache: &CacheStore,
        plan: &BatchPlan,
        mode: IngestMode,
        cancel: &CancelFlag,
    ) -> Result<BatchReport> {
        let prior = cache.read()?;
        info!(
            index = plan.index.len(),
            remove = plan.remove.len(),
            mode = %mode,
            "starting batch"
        );

        match self.apply_plan(plan, mode, cancel).await {
            Ok(report) => {
                cache.replace(&plan.next_snapshot)?;
                info!(
                    files_indexed = report.files_indexed,
                    files_removed = report.files_removed,
                    chunks = report.chunks_written,
                    "batch committed"
                );
                Ok(report)
            }
            Err((path, cause)) => {
                error!(path = %path.display(), error = %cause, "batch failed");
                if let Err(rollback) = cache.rollback(&prior) {
                    error!(error = %rollback, "cache rollback failed");
                    return Err(IngestError::RollbackFailed {
                        path,
                        cause: Box::new(cause),
                        source: Box::new(rollback),
                    });
                }
                Err(IngestError::BatchFailed {
                    path,
                    source: Box::new(cause),
                })
            }
        }
    }

    async fn apply_plan(
        &self,
        plan: &BatchPlan,
        mode: IngestMode,
        cancel: &CancelFlag,
    ) -> std::result::Result<BatchReport, (PathBuf, IngestError)> {
        let mut report = BatchReport::default();
        let total = plan.index.len() + plan.remove.len();
        let mut position = 0;

        for path in &plan.index {
            position += 1;
            check_cancelled(cancel, path)?;
            info!(n = position, total, path = %path.display(), "processing");
            let written = self
                .ingest_source(path, mode)
                .await
                .map_err(|e| (path.clone(), e))?;
            report.files_indexed += 1;
            report.chunks_written += written;
        }

        for path in &plan.remove {
            position += 1;
            check_cancelled(cancel, path)?;
            info!(n = position, total, path = %path.display(), "removing");
            let deleted = self
                .remove_source(path)
                .await
                .map_err(|e| (path.clone(), e))?;
            report.files_removed += 1;
            report.records_deleted += deleted;
        }

        Ok(report)
    }

    fn build_record(
        &self,
        doc: &NormalizedDocument,
        chunk: &Chunk,
        embedding: Vec<f32>,
        processed_at: &str,
    ) -> ChunkRecord {
        let header_path = chunk.header_path.render();
        ChunkRecord {
            url: document_url(
                &self.base_url,
                &doc.version,
                &doc.key,
                &chunk.header_path.anchor(),
            ),
            chunk_number: chunk.chunk_number,
            version: doc.version.scaled,
            title: chunk_title(chunk),
            content: chunk.content.clone(),
            metadata: ChunkMetadata {
                source: CHUNK_SOURCE.to_string(),
                chunk_size: chunk.content.chars().count(),
                processed_at: processed_at.to_string(),
                filename: doc.key.clone(),
                version_str: doc.version.label.clone(),
                header_path,
                headers: chunk.header_path.metadata(),
            },
            embedding,
        }
    }
}

fn check_cancelled(
    cancel: &CancelFlag,
    path: &Path,
) -> std::result::Result<(), (PathBuf, IngestError)> {
    if cancel.is_cancelled() {
        warn!(path = %path.display(), "cancellation requested");
        return Err((path.to_path_buf(), IngestError::Cancelled(path.to_path_buf())));
    }
    Ok(())
}
