//! Pipeline state overview.
//!
//! A quick look at what each persisted store holds: tracked source files in
//! the cache, completed files in the progress ledger, and indexed records per
//! release. Used by `dh status` to confirm updates and bulk runs landed.

use anyhow::Result;

use crate::cache::CacheStore;
use crate::config::Config;
use crate::ledger::ProgressStore;
use crate::services::Services;
use crate::store::IndexStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusReport {
    pub cache_entries: usize,
    /// `(version label, completed files)`
    pub ledger: Vec<(String, usize)>,
    /// `(scaled version, records)`
    pub index: Vec<(i64, u64)>,
}

pub async fn collect(
    cache: &CacheStore,
    progress: &ProgressStore,
    store: &dyn IndexStore,
) -> crate::error::Result<StatusReport> {
    Ok(StatusReport {
        cache_entries: cache.read()?.len(),
        ledger: progress.ledger().counts(),
        index: store.count_by_version().await?,
    })
}

/// `dh status`
pub async fn run_status(config: &Config) -> Result<()> {
    let services = Services::open(config).await?;
    let progress = ProgressStore::open(&config.state.progress_path);
    let result = collect(&services.cache, &progress, &services.store).await;
    services.close().await;
    let report = result?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Pipeline status");
    println!("===============");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Cache:       {} ({} files)",
        config.state.cache_path.display(),
        report.cache_entries
    );
    println!("  Progress:    {}", config.state.progress_path.display());

    if !report.ledger.is_empty() {
        println!();
        println!("  Bulk progress:");
        println!("  {:<10} {:>8}", "VERSION", "FILES");
        println!("  {}", "-".repeat(19));
        for (version, files) in &report.ledger {
            println!("  {:<10} {:>8}", version, files);
        }
    }

    println!();
    if report.index.is_empty() {
        println!("  Index is empty.");
    } else {
        println!("  Index:");
        println!("  {:<10} {:>8}", "VERSION", "CHUNKS");
        println!("  {}", "-".repeat(19));
        for (version, records) in &report.index {
            println!("  {:<10} {:>8}", format_scaled(*version), records);
        }
    }
    println!();
    Ok(())
}

/// `170` → `17.0`
fn format_scaled(version: i64) -> String {
    format!("{}.{}", version / 10, version % 10)
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
