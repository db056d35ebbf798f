//! Service container built once at startup.

use std::sync::Arc;

use tracing::info;

use crate::reconcile::Reconciler;
use crate::retrieve::Retriever;
use crate::users::UserManager;
use docvault_core::{DocVaultConfig, Error, Result};
use docvault_index::{CollectionSpec, SqliteVectorIndex, VectorIndex};
use docvault_infer::{create_embedder, CachedEmbedder, EmbedderBackend};
use docvault_ingest::{ContentExtractor, IngestSettings, Ingester};
use docvault_store::DocumentStore;

/// Handles shared by every request.
pub struct Services {
    pub config: DocVaultConfig,
    pub store: Arc<DocumentStore>,
    pub index: Arc<dyn VectorIndex>,
    /// Embeds document chunks.
    pub embedder: Arc<dyn EmbedderBackend>,
    /// Embeds search queries, with memoization.
    pub query_embedder: Arc<dyn EmbedderBackend>,
    pub extractor: Arc<ContentExtractor>,
    ingest_settings: IngestSettings,
}

impl Services {
    /// Open the on-disk stores and the configured embedder.
    pub fn open(config: DocVaultConfig) -> Result<Self> {
        let store = DocumentStore::open(&config.data_paths.metadata)?;
        let index = SqliteVectorIndex::open(&config.data_paths.vectors, config.max_loaded_rows)?;
        let embedder = create_embedder(&config.embedder, config.collection.dim)?;
        Self::new(
            config,
            Arc::new(store),
            Arc::new(index),
            embedder,
            Arc::new(ContentExtractor::with_defaults()),
        )
    }

    /// Wire already-built backends. Ensures the collection exists.
    pub fn new(
        config: DocVaultConfig,
        store: Arc<DocumentStore>,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbedderBackend>,
        extractor: Arc<ContentExtractor>,
    ) -> Result<Self> {
        if embedder.dimension() != config.collection.dim {
            return Err(Error::Config(format!(
                "embedder {} produces {}-dim vectors but collection {} expects {}",
                embedder.name(),
                embedder.dimension(),
                config.collection.name,
                config.collection.dim
            )));
        }
        index.ensure_collection(&CollectionSpec::from(&config.collection))?;

        let query_embedder: Arc<dyn EmbedderBackend> =
            Arc::new(CachedEmbedder::with_defaults(embedder.clone()));
        let ingest_settings = IngestSettings::from_config(&config);

        info!(
            "Services ready: collection={} dim={} metric={} embedder={}",
            config.collection.name,
            config.collection.dim,
            config.collection.metric,
            embedder.name()
        );

        Ok(Self {
            config,
            store,
            index,
            embedder,
            query_embedder,
            extractor,
            ingest_settings,
        })
    }

    /// Release every loaded partition of the collection.
    pub fn close(&self) -> Result<()> {
        self.index.release_collection(&self.config.collection.name)?;
        info!("Released collection {}", self.config.collection.name);
        Ok(())
    }

    pub fn ingester(&self) -> Ingester<'_> {
        Ingester::new(
            &self.store,
            self.index.as_ref(),
            self.embedder.as_ref(),
            &self.extractor,
            self.ingest_settings.clone(),
        )
    }

    pub fn users(&self) -> UserManager<'_> {
        UserManager::new(self)
    }

    pub fn retriever(&self) -> Retriever<'_> {
        Retriever::new(self)
    }

    pub fn reconciler(&self) -> Reconciler<'_> {
        Reconciler::new(self)
    }
}
