use std::cmp::Ordering;

use crate::{
    error::{EngineError, EngineResult},
    models::{Recommendation, UserId},
    services::{factor_model::TrainedModel, rating_store::RatingStore},
};

/// Ranks unseen items for a user against a frozen model
pub struct Recommender<'a> {
    model: &'a TrainedModel,
    store: &'a RatingStore,
}

impl<'a> Recommender<'a> {
    /// `store` decides what counts as already seen and which items exist
    pub fn new(model: &'a TrainedModel, store: &'a RatingStore) -> Self {
        Self { model, store }
    }

    /// Returns up to `n` unseen items, best first.
    ///
    /// Equal scores are ordered by ascending item id. A user who has rated
    /// every item gets an empty list; a user the model never saw is an error.
    pub fn top_n(&self, user_id: UserId, n: usize) -> EngineResult<Vec<Recommendation>> {
        let user = self
            .model
            .user_index(user_id)
            .map_err(|_| EngineError::UnknownUser(user_id))?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let rated = self.store.rated_items(user_id);
        let factor_model = self.model.factor_model();

        let mut scored = Vec::new();
        for &item_id in self.store.all_items() {
            if rated.contains(&item_id) {
                continue;
            }
            // Items registered after training have no factors yet
            let Some(item) = self.model.items().index_of(item_id) else {
                tracing::debug!(item_id, "Skipping item unknown to the model");
                continue;
            };
            scored.push(Recommendation {
                item_id,
                score: factor_model.predict(user, item)?,
            });
        }

        if scored.len() > n {
            scored.select_nth_unstable_by(n - 1, ranking);
            scored.truncate(n);
        }
        scored.sort_by(ranking);

        Ok(scored)
    }
}

fn ranking(a: &Recommendation, b: &Recommendation) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.item_id.cmp(&b.item_id))
}
