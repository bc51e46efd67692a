use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Externally supplied user identifier
pub type UserId = u32;

/// Externally supplied item identifier
pub type ItemId = u32;

/// A single observed (user, item, rating) triple
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub value: f64,
}

impl Rating {
    pub fn new(user_id: UserId, item_id: ItemId, value: f64) -> Self {
        Self {
            user_id,
            item_id,
            value,
        }
    }
}

/// Closed interval every rating (and every prediction) lives in
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RatingScale {
    pub min: f64,
    pub max: f64,
}

impl Default for RatingScale {
    fn default() -> Self {
        Self { min: 0.5, max: 5.0 }
    }
}

impl RatingScale {
    /// Creates a scale, rejecting empty or non-finite intervals
    pub fn new(min: f64, max: f64) -> EngineResult<Self> {
        if !min.is_finite() || !max.is_finite() || min >= max {
            return Err(EngineError::InvalidConfig(format!(
                "rating scale [{min}, {max}] must be a non-empty finite interval"
            )));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Fails with a range error when `value` falls outside the scale
    pub fn check(&self, value: f64) -> EngineResult<()> {
        if self.contains(value) {
            Ok(())
        } else {
            Err(EngineError::RatingOutOfRange {
                value,
                min: self.min,
                max: self.max,
            })
        }
    }
}

/// How repeated ratings for the same (user, item) pair are stored
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Every submission is kept as its own observation
    #[default]
    KeepAll,
    /// The most recent submission replaces the stored value
    KeepLatest,
    /// The stored value is the mean of all submissions
    Average,
}
