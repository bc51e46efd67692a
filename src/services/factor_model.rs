use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{EngineError, EngineResult, EntityKind},
    models::{ItemId, RatingScale, UserId},
    services::trainer::{EpochReport, TrainingConfig},
};

/// Bijection between raw identifiers and dense row indices.
///
/// Built once from an ordered id set, so index `n` is always the `n`-th
/// smallest id. Serialized as the plain id list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "Vec<u32>", try_from = "Vec<u32>")]
pub struct IdIndex {
    ids: Vec<u32>,
    positions: HashMap<u32, usize>,
}

impl IdIndex {
    pub fn from_ids(ids: &BTreeSet<u32>) -> Self {
        let ids: Vec<u32> = ids.iter().copied().collect();
        let positions = ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
        Self { ids, positions }
    }

    pub fn index_of(&self, id: u32) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn id_at(&self, index: usize) -> Option<u32> {
        self.ids.get(index).copied()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<IdIndex> for Vec<u32> {
    fn from(index: IdIndex) -> Self {
        index.ids
    }
}

impl TryFrom<Vec<u32>> for IdIndex {
    type Error = String;

    fn try_from(ids: Vec<u32>) -> Result<Self, Self::Error> {
        let mut positions = HashMap::with_capacity(ids.len());
        for (pos, &id) in ids.iter().enumerate() {
            if positions.insert(id, pos).is_some() {
                return Err(format!("duplicate id {id} in index"));
            }
        }
        Ok(Self { ids, positions })
    }
}

/// Latent factors and biases over dense user/item indices.
///
/// Parameters are only writable from inside the crate (the trainer); once a
/// model is handed out it is read-only. Deserialization rejects parameter
/// vectors whose lengths disagree with the declared shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "FactorRecord")]
pub struct FactorModel {
    num_users: usize,
    num_items: usize,
    factors: usize,
    scale: RatingScale,
    global_bias: f64,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    /// Row-major `num_users x factors`
    user_factors: Vec<f64>,
    /// Row-major `num_items x factors`
    item_factors: Vec<f64>,
}

impl FactorModel {
    /// Builds a zeroed model with the given shape
    pub fn new(
        num_users: usize,
        num_items: usize,
        factors: usize,
        scale: RatingScale,
    ) -> EngineResult<Self> {
        if factors == 0 {
            return Err(EngineError::InvalidConfig(
                "number of latent factors must be positive".to_string(),
            ));
        }
        Ok(Self {
            num_users,
            num_items,
            factors,
            scale,
            global_bias: 0.0,
            user_bias: vec![0.0; num_users],
            item_bias: vec![0.0; num_items],
            user_factors: vec![0.0; num_users * factors],
            item_factors: vec![0.0; num_items * factors],
        })
    }

    /// Predicted rating for dense indices, clipped to the rating scale
    pub fn predict(&self, user: usize, item: usize) -> EngineResult<f64> {
        if user >= self.num_users {
            return Err(EngineError::UnknownIndex {
                entity: EntityKind::User,
                index: user,
                len: self.num_users,
            });
        }
        if item >= self.num_items {
            return Err(EngineError::UnknownIndex {
                entity: EntityKind::Item,
                index: item,
                len: self.num_items,
            });
        }
        Ok(self.scale.clip(self.raw_score(user, item)))
    }

    /// Unclipped score; callers guarantee the indices are in range
    pub(crate) fn raw_score(&self, user: usize, item: usize) -> f64 {
        let dot: f64 = self
            .user_row(user)
            .iter()
            .zip(self.item_row(item))
            .map(|(u, i)| u * i)
            .sum();
        self.global_bias + self.user_bias[user] + self.item_bias[item] + dot
    }

    pub fn user_row(&self, user: usize) -> &[f64] {
        &self.user_factors[user * self.factors..(user + 1) * self.factors]
    }

    pub fn item_row(&self, item: usize) -> &[f64] {
        &self.item_factors[item * self.factors..(item + 1) * self.factors]
    }

    pub fn global_bias(&self) -> f64 {
        self.global_bias
    }

    pub fn user_bias(&self, user: usize) -> Option<f64> {
        self.user_bias.get(user).copied()
    }

    pub fn item_bias(&self, item: usize) -> Option<f64> {
        self.item_bias.get(item).copied()
    }

    pub fn num_users(&self) -> usize {
        self.num_users
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    pub fn factors(&self) -> usize {
        self.factors
    }

    pub fn scale(&self) -> RatingScale {
        self.scale
    }

    pub(crate) fn set_global_bias(&mut self, value: f64) {
        self.global_bias = value;
    }

    /// Mutable access to both factor matrices for initialisation
    pub(crate) fn factor_matrices_mut(&mut self) -> (&mut [f64], &mut [f64]) {
        (&mut self.user_factors, &mut self.item_factors)
    }

    /// Mutable views of everything one observation touches:
    /// `(user_bias, item_bias, user_row, item_row)`
    pub(crate) fn params_mut(
        &mut self,
        user: usize,
        item: usize,
    ) -> (&mut f64, &mut f64, &mut [f64], &mut [f64]) {
        let k = self.factors;
        (
            &mut self.user_bias[user],
            &mut self.item_bias[item],
            &mut self.user_factors[user * k..(user + 1) * k],
            &mut self.item_factors[item * k..(item + 1) * k],
        )
    }
}

#[derive(Deserialize)]
struct FactorRecord {
    num_users: usize,
    num_items: usize,
    factors: usize,
    scale: RatingScale,
    global_bias: f64,
    user_bias: Vec<f64>,
    item_bias: Vec<f64>,
    user_factors: Vec<f64>,
    item_factors: Vec<f64>,
}

fn check_len(what: &str, actual: usize, expected: Option<usize>) -> EngineResult<()> {
    match expected {
        Some(expected) if expected == actual => Ok(()),
        Some(expected) => Err(EngineError::InvalidSnapshot(format!(
            "{what} has {actual} entries, expected {expected}"
        ))),
        None => Err(EngineError::InvalidSnapshot(format!("{what} shape overflows"))),
    }
}

impl TryFrom<FactorRecord> for FactorModel {
    type Error = EngineError;

    fn try_from(record: FactorRecord) -> Result<Self, Self::Error> {
        let scale = RatingScale::new(record.scale.min, record.scale.max)?;
        if record.factors == 0 {
            return Err(EngineError::InvalidSnapshot(
                "factor model has zero latent factors".to_string(),
            ));
        }
        check_len("user_bias", record.user_bias.len(), Some(record.num_users))?;
        check_len("item_bias", record.item_bias.len(), Some(record.num_items))?;
        check_len(
            "user_factors",
            record.user_factors.len(),
            record.num_users.checked_mul(record.factors),
        )?;
        check_len(
            "item_factors",
            record.item_factors.len(),
            record.num_items.checked_mul(record.factors),
        )?;

        Ok(Self {
            num_users: record.num_users,
            num_items: record.num_items,
            factors: record.factors,
            scale,
            global_bias: record.global_bias,
            user_bias: record.user_bias,
            item_bias: record.item_bias,
            user_factors: record.user_factors,
            item_factors: record.item_factors,
        })
    }
}

/// A fitted model together with the id mappings and how it was trained
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "TrainedRecord")]
pub struct TrainedModel {
    pub(crate) model: FactorModel,
    pub(crate) users: IdIndex,
    pub(crate) items: IdIndex,
    pub(crate) config: TrainingConfig,
    pub(crate) trained_at: DateTime<Utc>,
    pub(crate) history: Vec<EpochReport>,
}

impl TrainedModel {
    /// Predicted rating for raw ids. Ids absent from training are a cold-start error.
    pub fn predict(&self, user_id: UserId, item_id: ItemId) -> EngineResult<f64> {
        let user = self.user_index(user_id)?;
        let item = self.item_index(item_id)?;
        self.model.predict(user, item)
    }

    pub fn user_index(&self, user_id: UserId) -> EngineResult<usize> {
        self.users
            .index_of(user_id)
            .ok_or(EngineError::UnknownEntity {
                entity: EntityKind::User,
                id: u64::from(user_id),
            })
    }

    pub fn item_index(&self, item_id: ItemId) -> EngineResult<usize> {
        self.items
            .index_of(item_id)
            .ok_or(EngineError::UnknownEntity {
                entity: EntityKind::Item,
                id: u64::from(item_id),
            })
    }

    pub fn knows_user(&self, user_id: UserId) -> bool {
        self.users.index_of(user_id).is_some()
    }

    pub fn knows_item(&self, item_id: ItemId) -> bool {
        self.items.index_of(item_id).is_some()
    }

    pub fn factor_model(&self) -> &FactorModel {
        &self.model
    }

    pub fn users(&self) -> &IdIndex {
        &self.users
    }

    pub fn items(&self) -> &IdIndex {
        &self.items
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    /// Per-epoch training reports, oldest first
    pub fn history(&self) -> &[EpochReport] {
        &self.history
    }
}

#[derive(Deserialize)]
struct TrainedRecord {
    model: FactorModel,
    users: IdIndex,
    items: IdIndex,
    config: TrainingConfig,
    trained_at: DateTime<Utc>,
    history: Vec<EpochReport>,
}

impl TryFrom<TrainedRecord> for TrainedModel {
    type Error = EngineError;

    fn try_from(record: TrainedRecord) -> Result<Self, Self::Error> {
        check_len("user index", record.users.len(), Some(record.model.num_users()))?;
        check_len("item index", record.items.len(), Some(record.model.num_items()))?;
        Ok(Self {
            model: record.model,
            users: record.users,
            items: record.items,
            config: record.config,
            trained_at: record.trained_at,
            history: record.history,
        })
    }
}
