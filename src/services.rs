//! Construction of the pipeline's long-lived collaborators from config.
//!
//! Commands build one [`Services`] value up front and hand borrowed pieces to
//! the detector, orchestrator and query path.

use anyhow::Result;

use crate::cache::CacheStore;
use crate::chunk::ChunkSettings;
use crate::config::Config;
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::ingest::Ingestor;
use crate::layout::SourceLayout;
use crate::migrate;
use crate::normalize::{create_normalizer, Normalizer};
use crate::retry::RetryPolicy;
use crate::store::sqlite::SqliteStore;

pub struct Services {
    pub layout: SourceLayout,
    pub normalizer: Box<dyn Normalizer>,
    pub embedder: Box<dyn EmbeddingProvider>,
    pub store: SqliteStore,
    pub cache: CacheStore,
    chunking: ChunkSettings,
    retry: RetryPolicy,
    base_url: String,
}

impl Services {
    /// Open the index database (creating the schema if needed) and build the
    /// configured normalizer and embedding provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let layout = config.layout()?;
        let normalizer = create_normalizer(&config.normalizer)?;
        let embedder = create_provider(&config.embedding)?;

        let pool = db::connect(&config.db.path).await?;
        migrate::apply(&pool).await?;

        Ok(Self {
            layout,
            normalizer,
            embedder,
            store: SqliteStore::new(pool),
            cache: CacheStore::new(&config.state.cache_path),
            chunking: config.chunking.settings(),
            retry: config.retry.policy(),
            base_url: config.publish.base_url.clone(),
        })
    }

    pub fn ingestor(&self) -> Ingestor<'_> {
        Ingestor::new(
            &self.layout,
            self.normalizer.as_ref(),
            self.embedder.as_ref(),
            &self.store,
        )
        .with_chunking(self.chunking)
        .with_retry(self.retry)
        .with_base_url(self.base_url.clone())
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}
