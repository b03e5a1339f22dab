//! Incremental update: detect changes since the last committed cache
//! snapshot and push them through the orchestrator in upsert mode.
//!
//! The first run against an empty cache only records a baseline. From then
//! on, added and modified sources are re-indexed, removed ones have their
//! records deleted, and the cache moves forward only when the whole batch
//! succeeds.

use anyhow::Result;
use tracing::info;

use crate::cache::CacheStore;
use crate::changes::ChangeDetector;
use crate::config::Config;
use crate::error;
use crate::ingest::{BatchPlan, BatchReport, CancelFlag, Ingestor};
use crate::models::IngestMode;
use crate::services::Services;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// The cache was empty; a baseline was written and nothing processed.
    pub bootstrap: bool,
    pub added: usize,
    pub modified: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub batch: BatchReport,
}

/// One detect-and-apply cycle.
pub async fn check_and_apply(
    ingestor: &Ingestor<'_>,
    cache: &CacheStore,
    cancel: &CancelFlag,
) -> error::Result<UpdateReport> {
    let previous = cache.read()?;
    let detector = ChangeDetector::new(ingestor.layout())?;
    let detection = detector.detect(&previous)?;

    if detection.bootstrap {
        cache.replace(&detection.current)?;
        info!(files = detection.current.len(), "baseline recorded");
        return Ok(UpdateReport {
            bootstrap: true,
            unchanged: detection.current.len(),
            ..UpdateReport::default()
        });
    }

    let plan = BatchPlan::from_detection(&detection);
    let batch = ingestor
        .process_batch(cache, &plan, IngestMode::Upsert, cancel)
        .await?;

    Ok(UpdateReport {
        bootstrap: false,
        added: detection.changes.added.len(),
        modified: detection.changes.modified.len(),
        removed: detection.changes.removed.len(),
        unchanged: detection.unchanged,
        batch,
    })
}

/// `dh update`
pub async fn run_update(config: &Config, cancel: &CancelFlag) -> Result<()> {
    let services = Services::open(config).await?;
    let result = check_and_apply(&services.ingestor(), &services.cache, cancel).await;
    services.close().await;
    let report = result?;

    println!("update");
    if report.bootstrap {
        println!("  no previous cache, baseline recorded");
        println!("  tracked: {} files", report.unchanged);
    }
    println!("  added: {}", report.added);
    println!("  modified: {}", report.modified);
    println!("  removed: {}", report.removed);
    if !report.bootstrap {
        println!("  unchanged: {}", report.unchanged);
        println!("  chunks written: {}", report.batch.chunks_written);
        println!("  records deleted: {}", report.batch.records_deleted);
    }
    println!("ok");
    Ok(())
}
