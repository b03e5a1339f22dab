//! TOML configuration.
//!
//! A single file (default `config/dh.toml`) describes where the raw and
//! normalized trees live, which releases to ingest, where the cache and
//! progress files are kept, and how to reach the embedding service.
//!
//! ```toml
//! [db]
//! path = "./data/dh.sqlite"
//!
//! [sources]
//! raw_dir = "./raw_data"
//! normalized_dir = "./raw_data/markdown"
//! versions = ["16.0", "17.0", "18.0"]
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chunk::ChunkSettings;
use crate::ingest::DEFAULT_BASE_URL;
use crate::layout::{SourceLayout, Version};
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub sources: SourcesConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub normalizer: NormalizerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SourcesConfig {
    pub raw_dir: PathBuf,
    pub normalized_dir: PathBuf,
    pub versions: Vec<String>,
    #[serde(default = "default_source_extension")]
    pub source_extension: String,
}

fn default_source_extension() -> String {
    "rst".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct StateConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_progress_path")]
    pub progress_path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            progress_path: default_progress_path(),
        }
    }
}

fn default_cache_path() -> PathBuf {
    PathBuf::from(".file_cache.json")
}
fn default_progress_path() -> PathBuf {
    PathBuf::from("processing_progress.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_chars")]
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_chars: default_overlap_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    5000
}
fn default_overlap_chars() -> usize {
    500
}

impl ChunkingConfig {
    pub fn settings(&self) -> ChunkSettings {
        ChunkSettings {
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the `ollama` provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NormalizerConfig {
    #[serde(default = "default_normalizer_kind")]
    pub kind: String,
    #[serde(default = "default_pandoc_path")]
    pub pandoc_path: PathBuf,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            kind: default_normalizer_kind(),
            pandoc_path: default_pandoc_path(),
        }
    }
}

fn default_normalizer_kind() -> String {
    "pandoc".to_string()
}
fn default_pandoc_path() -> PathBuf {
    PathBuf::from("pandoc")
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
        }
    }
}

fn default_limit() -> usize {
    6
}

impl Config {
    /// Releases as parsed versions. Labels were validated by [`load_config`].
    pub fn versions(&self) -> Result<Vec<Version>> {
        self.sources
            .versions
            .iter()
            .map(|label| {
                Version::parse(label).with_context(|| format!("sources.versions: '{}'", label))
            })
            .collect()
    }

    pub fn layout(&self) -> Result<SourceLayout> {
        Ok(SourceLayout::new(
            &self.sources.raw_dir,
            &self.sources.normalized_dir,
            self.versions()?,
            &self.sources.source_extension,
        )?)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Sources
    if config.sources.versions.is_empty() {
        bail!("sources.versions must list at least one release");
    }
    config.versions()?;
    if config.sources.source_extension.trim_start_matches('.').is_empty() {
        bail!("sources.source_extension must not be empty");
    }

    // Chunking
    if config.chunking.max_chars == 0 {
        bail!("chunking.max_chars must be > 0");
    }
    if config.chunking.overlap_chars >= config.chunking.max_chars {
        bail!(
            "chunking.overlap_chars ({}) must be < chunking.max_chars ({})",
            config.chunking.overlap_chars,
            config.chunking.max_chars
        );
    }

    // Retry
    if config.retry.max_attempts == 0 {
        bail!("retry.max_attempts must be >= 1");
    }

    // Retrieval
    if config.retrieval.default_limit == 0 {
        bail!("retrieval.default_limit must be >= 1");
    }

    // Embedding
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }

    match config.normalizer.kind.as_str() {
        "pandoc" | "passthrough" => {}
        other => bail!(
            "Unknown normalizer: '{}'. Must be pandoc or passthrough.",
            other
        ),
    }

    Ok(())
}
