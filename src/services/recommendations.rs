use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, EngineResult},
    models::{CatalogItem, ItemId, Recommendation, UserId},
    services::{
        factor_model::TrainedModel,
        rating_store::RatingStore,
        recommender::Recommender,
        trainer::{evaluate, Evaluation, Trainer, TrainingConfig},
    },
};

/// Everything needed to go from ingested ratings to a frozen engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub training: TrainingConfig,
    /// Share of ratings held out for evaluation, in `[0, 1)`
    pub test_fraction: f64,
    pub split_seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            training: TrainingConfig::default(),
            test_fraction: 0.2,
            split_seed: 42,
        }
    }
}

/// Trained recommendation service.
///
/// Built once by [`RecommendationEngine::train`] (or loaded from a snapshot)
/// and read-only afterwards, so it can be shared behind an `Arc` and queried
/// concurrently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationEngine {
    store: RatingStore,
    model: TrainedModel,
    evaluation: Option<Evaluation>,
    /// Display metadata known when the engine was built
    #[serde(default)]
    catalog: BTreeMap<ItemId, CatalogItem>,
}

impl RecommendationEngine {
    /// Splits `store`, fits a model on the training half and scores it on the rest.
    ///
    /// The full store is kept so that recommendations exclude every item a
    /// user rated, including the held-out ones.
    pub fn train(store: RatingStore, config: &EngineConfig) -> EngineResult<Self> {
        let trainer = Trainer::new(config.training.clone())?;
        if store.is_empty() {
            return Err(EngineError::EmptyDataset);
        }

        let (train, test) = store.split(config.test_fraction, config.split_seed)?;
        tracing::info!(
            train = train.len(),
            test = test.len(),
            test_fraction = config.test_fraction,
            split_seed = config.split_seed,
            "Split ratings"
        );

        let validation = (!test.is_empty()).then_some(&test);
        let model = trainer.fit_with_validation(&train, validation)?;

        let evaluation = match validation {
            Some(test) => Some(evaluate(&model, test)?),
            None => None,
        };
        if let Some(eval) = &evaluation {
            tracing::info!(
                rmse = eval.rmse,
                mae = eval.mae,
                evaluated = eval.evaluated,
                skipped = eval.skipped,
                "Evaluated on held-out ratings"
            );
        }

        Ok(Self {
            store,
            model,
            evaluation,
            catalog: BTreeMap::new(),
        })
    }

    /// Wraps an already trained model; no evaluation is attached
    pub fn from_parts(store: RatingStore, model: TrainedModel) -> Self {
        Self {
            store,
            model,
            evaluation: None,
            catalog: BTreeMap::new(),
        }
    }

    /// Attaches item metadata so it travels with snapshots
    pub fn with_catalog(mut self, items: impl IntoIterator<Item = CatalogItem>) -> Self {
        self.catalog = items
            .into_iter()
            .map(|item| (item.item_id, item))
            .collect();
        self
    }

    pub fn recommend(&self, user_id: UserId, n: usize) -> EngineResult<Vec<Recommendation>> {
        Recommender::new(&self.model, &self.store).top_n(user_id, n)
    }

    pub fn predict(&self, user_id: UserId, item_id: ItemId) -> EngineResult<f64> {
        self.model.predict(user_id, item_id)
    }

    pub fn model(&self) -> &TrainedModel {
        &self.model
    }

    pub fn store(&self) -> &RatingStore {
        &self.store
    }

    pub fn evaluation(&self) -> Option<&Evaluation> {
        self.evaluation.as_ref()
    }

    pub fn catalog(&self) -> &BTreeMap<ItemId, CatalogItem> {
        &self.catalog
    }

    /// Writes the engine as JSON to `path`
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), "Saved model snapshot");
        Ok(())
    }

    /// Reads an engine previously written by [`RecommendationEngine::save`]
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let engine: Self = serde_json::from_reader(reader)?;
        tracing::info!(
            path = %path.display(),
            users = engine.model.users().len(),
            items = engine.model.items().len(),
            catalog = engine.catalog.len(),
            "Loaded model snapshot"
        );
        Ok(engine)
    }
}
