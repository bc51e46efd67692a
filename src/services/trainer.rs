use std::time::Instant;

use chrono::Utc;
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, EngineResult, EntityKind},
    models::Rating,
    services::{
        factor_model::{FactorModel, IdIndex, TrainedModel},
        rating_store::RatingStore,
    },
};

/// Hyperparameters for stochastic gradient descent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub learning_rate: f64,
    pub regularization: f64,
    /// Latent dimensionality `k`
    pub num_factors: usize,
    pub num_epochs: usize,
    /// Seeds factor initialisation and the per-epoch shuffle
    pub random_seed: u64,
    pub init_mean: f64,
    pub init_std: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.005,
            regularization: 0.02,
            num_factors: 100,
            num_epochs: 20,
            random_seed: 42,
            init_mean: 0.0,
            init_std: 0.1,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidConfig(msg));

        if self.num_factors == 0 {
            return invalid("num_factors must be positive".to_string());
        }
        if self.num_epochs == 0 {
            return invalid("num_epochs must be positive".to_string());
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return invalid(format!(
                "learning_rate must be a positive number, got {}",
                self.learning_rate
            ));
        }
        if !self.regularization.is_finite() || self.regularization < 0.0 {
            return invalid(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            ));
        }
        if !self.init_mean.is_finite() || !self.init_std.is_finite() || self.init_std < 0.0 {
            return invalid(format!(
                "factor initialisation N({}, {}) is not a valid distribution",
                self.init_mean, self.init_std
            ));
        }
        Ok(())
    }
}

/// Metrics recorded after each pass over the training data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EpochReport {
    /// 1-based epoch number
    pub epoch: usize,
    /// RMSE of the errors seen during the pass, before each update
    pub train_rmse: f64,
    pub validation_rmse: Option<f64>,
}

/// Accuracy of a model over held-out ratings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Evaluation {
    pub rmse: f64,
    pub mae: f64,
    pub evaluated: usize,
    /// Ratings whose user or item the model has never seen
    pub skipped: usize,
}

/// Fits a [`FactorModel`] to a [`RatingStore`] with SGD
#[derive(Debug, Clone)]
pub struct Trainer {
    config: TrainingConfig,
}

impl Trainer {
    pub fn new(config: TrainingConfig) -> EngineResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn fit(&self, store: &RatingStore) -> EngineResult<TrainedModel> {
        self.fit_with_validation(store, None)
    }

    /// Trains for the configured number of epochs.
    ///
    /// When `validation` is given its RMSE is recorded after every epoch.
    /// It is only reported; training always runs every epoch.
    pub fn fit_with_validation(
        &self,
        store: &RatingStore,
        validation: Option<&RatingStore>,
    ) -> EngineResult<TrainedModel> {
        let start = Instant::now();
        let global_mean = store.mean().ok_or(EngineError::EmptyDataset)?;
        let config = &self.config;

        let users = IdIndex::from_ids(store.all_users());
        let items = IdIndex::from_ids(store.all_items());
        let mut model =
            FactorModel::new(users.len(), items.len(), config.num_factors, store.scale())?;
        model.set_global_bias(global_mean);

        tracing::info!(
            users = users.len(),
            items = items.len(),
            observations = store.len(),
            factors = config.num_factors,
            epochs = config.num_epochs,
            global_mean,
            "Starting training"
        );

        let mut rng = StdRng::seed_from_u64(config.random_seed);
        let normal = Normal::new(config.init_mean, config.init_std)
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        let (user_factors, item_factors) = model.factor_matrices_mut();
        for value in user_factors.iter_mut().chain(item_factors.iter_mut()) {
            *value = normal.sample(&mut rng);
        }

        let samples = store
            .observations()
            .iter()
            .map(|rating| resolve(&users, &items, rating))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut history = Vec::with_capacity(config.num_epochs);

        for epoch in 1..=config.num_epochs {
            order.shuffle(&mut rng);

            let mut squared_error = 0.0;
            for &sample in &order {
                let (user, item, value) = samples[sample];
                let err = sgd_step(
                    &mut model,
                    user,
                    item,
                    value,
                    config.learning_rate,
                    config.regularization,
                );
                squared_error += err * err;
            }

            let train_rmse = (squared_error / samples.len() as f64).sqrt();
            if !train_rmse.is_finite() {
                tracing::warn!(epoch, "Training diverged");
                return Err(EngineError::InvalidConfig(format!(
                    "training diverged at epoch {epoch}; learning_rate {} is too large",
                    config.learning_rate
                )));
            }

            let validation_rmse = validation
                .and_then(|v| accuracy(&model, &users, &items, v))
                .map(|eval| eval.rmse);

            tracing::debug!(epoch, train_rmse, validation_rmse, "Epoch finished");
            history.push(EpochReport {
                epoch,
                train_rmse,
                validation_rmse,
            });
        }

        tracing::info!(
            processing_time_ms = start.elapsed().as_millis(),
            final_rmse = history.last().map(|r| r.train_rmse),
            "Training completed"
        );

        Ok(TrainedModel {
            model,
            users,
            items,
            config: self.config.clone(),
            trained_at: Utc::now(),
            history,
        })
    }
}

/// Measures RMSE and MAE of `model` over `store`
pub fn evaluate(model: &TrainedModel, store: &RatingStore) -> EngineResult<Evaluation> {
    accuracy(&model.model, &model.users, &model.items, store).ok_or(EngineError::EmptyDataset)
}

fn accuracy(
    model: &FactorModel,
    users: &IdIndex,
    items: &IdIndex,
    store: &RatingStore,
) -> Option<Evaluation> {
    let mut squared = 0.0;
    let mut absolute = 0.0;
    let mut evaluated = 0usize;
    let mut skipped = 0usize;

    for rating in store.observations() {
        let prediction = resolve(users, items, rating)
            .and_then(|(user, item, _)| model.predict(user, item));
        match prediction {
            Ok(score) => {
                let err = rating.value - score;
                squared += err * err;
                absolute += err.abs();
                evaluated += 1;
            }
            Err(_) => skipped += 1,
        }
    }

    if evaluated == 0 {
        return None;
    }
    Some(Evaluation {
        rmse: (squared / evaluated as f64).sqrt(),
        mae: absolute / evaluated as f64,
        evaluated,
        skipped,
    })
}

fn resolve(users: &IdIndex, items: &IdIndex, rating: &Rating) -> EngineResult<(usize, usize, f64)> {
    let user = users
        .index_of(rating.user_id)
        .ok_or(EngineError::UnknownEntity {
            entity: EntityKind::User,
            id: u64::from(rating.user_id),
        })?;
    let item = items
        .index_of(rating.item_id)
        .ok_or(EngineError::UnknownEntity {
            entity: EntityKind::Item,
            id: u64::from(rating.item_id),
        })?;
    Ok((user, item, rating.value))
}

/// One SGD update for a single observation. Returns the pre-update error.
fn sgd_step(
    model: &mut FactorModel,
    user: usize,
    item: usize,
    value: f64,
    lr: f64,
    reg: f64,
) -> f64 {
    let err = value - model.raw_score(user, item);
    let (user_bias, item_bias, user_row, item_row) = model.params_mut(user, item);

    *user_bias += lr * (err - reg * *user_bias);
    *item_bias += lr * (err - reg * *item_bias);

    // Each component reads both old values before writing either.
    for (p, q) in user_row.iter_mut().zip(item_row.iter_mut()) {
        let (old_p, old_q) = (*p, *q);
        *p += lr * (err * old_q - reg * old_p);
        *q += lr * (err * old_p - reg * old_q);
    }

    err
}
