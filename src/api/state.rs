use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::models::{CatalogItem, ItemId};
use crate::services::{EngineConfig, RatingStore, RecommendationEngine};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<RwLock<AppStateInner>>,
    pub engine_config: Arc<EngineConfig>,
    /// Snapshot destination for freshly trained engines
    pub model_path: Option<Arc<str>>,
}

/// Inner state that can be modified
pub struct AppStateInner {
    /// Ratings ingested so far; the next training run reads a copy
    pub ratings: RatingStore,
    pub catalog: BTreeMap<ItemId, CatalogItem>,
    /// Last trained engine, frozen and shared with in-flight requests
    pub engine: Option<Arc<RecommendationEngine>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(RatingStore::default(), EngineConfig::default())
    }
}

impl AppState {
    /// Creates state with no catalog and no trained engine
    pub fn new(ratings: RatingStore, engine_config: EngineConfig) -> Self {
        Self::build(ratings, BTreeMap::new(), None, engine_config)
    }

    /// Creates state around a previously saved engine, resuming from its
    /// ratings and catalog
    pub fn from_engine(engine: RecommendationEngine, engine_config: EngineConfig) -> Self {
        let ratings = engine.store().clone();
        let catalog = engine.catalog().clone();
        Self::build(ratings, catalog, Some(Arc::new(engine)), engine_config)
    }

    fn build(
        ratings: RatingStore,
        catalog: BTreeMap<ItemId, CatalogItem>,
        engine: Option<Arc<RecommendationEngine>>,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AppStateInner {
                ratings,
                catalog,
                engine,
            })),
            engine_config: Arc::new(engine_config),
            model_path: None,
        }
    }

    pub fn with_model_path(mut self, path: impl Into<Arc<str>>) -> Self {
        self.model_path = Some(path.into());
        self
    }
}
