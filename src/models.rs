//! Core data models used throughout the pipeline.
//!
//! These types represent the documents, chunks, index records, and search
//! hits that flow through ingestion and retrieval.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chunk::HeaderPath;
use crate::layout::Version;

/// Value of the `source` metadata field on every indexed chunk.
pub const CHUNK_SOURCE: &str = "markdown_file";

/// One normalized document, alive only while its file is being processed.
#[derive(Debug, Clone)]
pub struct NormalizedDocument {
    /// Normalized file on disk.
    pub path: PathBuf,
    /// Path inside the release tree, e.g. `content/sales/index.md`.
    pub key: String,
    pub version: Version,
    pub text: String,
}

/// A slice of a normalized document, prefixed with its rendered header path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the chunker's output, starting at 0.
    pub chunk_number: i64,
    pub header_path: HeaderPath,
    pub content: String,
}

/// Metadata stored alongside each [`ChunkRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub source: String,
    pub chunk_size: usize,
    /// RFC 3339 UTC timestamp.
    pub processed_at: String,
    pub filename: String,
    pub version_str: String,
    pub header_path: String,
    /// `Header 1` .. `Header 4`, present only for enclosing levels.
    #[serde(flatten)]
    pub headers: BTreeMap<String, String>,
}

/// A persisted, embedded chunk keyed by `(url, chunk_number, version)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkRecord {
    pub url: String,
    pub chunk_number: i64,
    pub version: i64,
    pub title: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

/// A search result returned from the query path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub content: String,
    pub similarity: f32,
}

/// How a document's records reach the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestMode {
    /// Initial load. Records are written without clearing the document first.
    Insert,
    /// Incremental update. Existing records for the document are deleted
    /// before the new ones are written.
    Upsert,
}

impl fmt::Display for IngestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestMode::Insert => f.write_str("insert"),
            IngestMode::Upsert => f.write_str("upsert"),
        }
    }
}
