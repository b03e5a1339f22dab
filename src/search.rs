//! Query-time read path.
//!
//! The query is shaped exactly like chunk text at ingest time
//! ([`prepare_input`]), embedded once, and ranked against the records of a
//! single release by cosine similarity.

use anyhow::{bail, Result};
use tracing::debug;

use crate::config::Config;
use crate::embedding::{prepare_input, EmbeddingProvider};
use crate::error;
use crate::layout::Version;
use crate::models::SearchHit;
use crate::retry::RetryPolicy;
use crate::services::Services;
use crate::store::IndexStore;

/// Top `limit` chunks of `version` for `query`, best first.
///
/// A blank query or a zero limit returns no hits without calling the
/// embedding provider.
pub async fn search(
    embedder: &dyn EmbeddingProvider,
    store: &dyn IndexStore,
    retry: &RetryPolicy,
    query: &str,
    version: &Version,
    limit: usize,
) -> error::Result<Vec<SearchHit>> {
    if query.trim().is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let input = prepare_input(query);
    let query_vec = retry.run("embed query", || embedder.embed(&input)).await?;
    let hits = retry
        .run("search", || store.search(&query_vec, version.scaled, limit))
        .await?;
    debug!(version = %version, hits = hits.len(), "search complete");
    Ok(hits)
}

/// `dh search`
pub async fn run_search(
    config: &Config,
    query: &str,
    version: &str,
    limit: Option<usize>,
) -> Result<()> {
    let version = Version::parse(version)?;
    if !config.embedding.is_enabled() {
        bail!("search requires embeddings. Set [embedding] provider in config.");
    }

    let services = Services::open(config).await?;
    let limit = limit.unwrap_or(config.retrieval.default_limit);
    let result = search(
        services.embedder.as_ref(),
        &services.store,
        &config.retry.policy(),
        query,
        &version,
        limit,
    )
    .await;
    services.close().await;
    let hits = result?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!("{}. [{:.3}] {}", i + 1, hit.similarity, hit.title);
        println!("    url: {}", hit.url);
        let excerpt: String = hit.content.replace('\n', " ").chars().take(200).collect();
        println!("    excerpt: \"{}\"", excerpt.trim());
        println!();
    }
    Ok(())
}
