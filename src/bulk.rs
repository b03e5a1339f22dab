//! Bulk (non-incremental) indexing of the normalized tree.
//!
//! Every `*.md` file under each release's normalized `content/` directory is
//! indexed in insert mode. Finished files are recorded in the
//! [`ProgressStore`] one at a time, so an interrupted run resumes where it
//! stopped. The first failure ends the run; the ledger is saved either way.

use std::path::PathBuf;

use anyhow::Result;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::changes::{build_globset, walk_error};
use crate::config::Config;
use crate::error::{self, IngestError};
use crate::ingest::{CancelFlag, Ingestor};
use crate::layout::{SourceLayout, Version};
use crate::ledger::ProgressStore;
use crate::models::{IngestMode, NormalizedDocument};
use crate::services::Services;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkReport {
    pub processed: usize,
    pub skipped: usize,
    pub chunks_written: usize,
}

/// Normalized documents of one release, in file-name order.
pub fn normalized_documents(
    layout: &SourceLayout,
    version: &Version,
) -> error::Result<Vec<PathBuf>> {
    let root = layout.normalized_content_dir(version);
    if !root.exists() {
        warn!(version = %version, root = %root.display(), "normalized tree missing, skipping");
        return Ok(Vec::new());
    }

    let matcher = build_globset(&["**/*.md".to_string()])?;

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(&root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&root).unwrap_or(entry.path());
        if matcher.is_match(relative) {
            files.push(entry.path().to_path_buf());
        }
    }
    Ok(files)
}

/// Index every normalized document not yet in the ledger.
pub async fn index_all(
    ingestor: &Ingestor<'_>,
    progress: &mut ProgressStore,
    cancel: &CancelFlag,
) -> error::Result<BulkReport> {
    let result = index_pending(ingestor, progress, cancel).await;
    progress.flush();
    result
}

async fn index_pending(
    ingestor: &Ingestor<'_>,
    progress: &mut ProgressStore,
    cancel: &CancelFlag,
) -> error::Result<BulkReport> {
    let layout = ingestor.layout();
    let mut report = BulkReport::default();

    for version in layout.versions() {
        let files = normalized_documents(layout, version)?;
        info!(version = %version, files = files.len(), "indexing release");

        for path in files {
            let path_str = path.to_string_lossy().into_owned();
            if progress.is_done(&version.label, &path_str) {
                report.skipped += 1;
                continue;
            }
            if cancel.is_cancelled() {
                warn!(path = %path.display(), "cancellation requested");
                return Err(IngestError::Cancelled(path));
            }

            let text = std::fs::read_to_string(&path).map_err(|e| IngestError::io(&path, e))?;
            let doc = NormalizedDocument {
                key: layout.document_key(&path, version)?,
                path: path.clone(),
                version: version.clone(),
                text,
            };
            report.chunks_written += ingestor.index_document(&doc, IngestMode::Insert).await?;
            progress.mark_done(&version.label, &path_str);
            report.processed += 1;
        }
    }

    info!(
        processed = report.processed,
        skipped = report.skipped,
        chunks = report.chunks_written,
        "bulk index complete"
    );
    Ok(report)
}

/// `dh index`
pub async fn run_index(config: &Config, cancel: &CancelFlag) -> Result<()> {
    let services = Services::open(config).await?;
    let mut progress = ProgressStore::open(&config.state.progress_path);
    let result = index_all(&services.ingestor(), &mut progress, cancel).await;
    services.close().await;
    let report = result?;

    println!("index");
    println!("  processed: {} files", report.processed);
    println!("  skipped (already done): {} files", report.skipped);
    println!("  chunks written: {}", report.chunks_written);
    println!("ok");
    Ok(())
}
