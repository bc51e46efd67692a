use serde::Deserialize;

use crate::{
    error::EngineResult,
    models::{DuplicatePolicy, RatingScale},
    services::{EngineConfig, TrainingConfig},
};

/// Application configuration loaded from environment variables
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Lowest accepted rating
    #[serde(default = "default_rating_min")]
    pub rating_min: f64,

    /// Highest accepted rating
    #[serde(default = "default_rating_max")]
    pub rating_max: f64,

    /// How repeated (user, item) ratings are stored
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Share of ratings held out for evaluation
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,

    /// Seed of the train/test shuffle
    #[serde(default = "default_seed")]
    pub split_seed: u64,

    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,

    #[serde(default = "default_regularization")]
    pub regularization: f64,

    #[serde(default = "default_num_factors")]
    pub num_factors: usize,

    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,

    /// Seed of factor initialisation and epoch shuffles
    #[serde(default = "default_seed")]
    pub random_seed: u64,

    #[serde(default = "default_init_std")]
    pub init_std: f64,

    /// Where trained models are saved, and loaded from at startup
    #[serde(default)]
    pub model_path: Option<String>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_rating_min() -> f64 {
    RatingScale::default().min
}

fn default_rating_max() -> f64 {
    RatingScale::default().max
}

fn default_test_fraction() -> f64 {
    EngineConfig::default().test_fraction
}

fn default_seed() -> u64 {
    42
}

fn default_learning_rate() -> f64 {
    TrainingConfig::default().learning_rate
}

fn default_regularization() -> f64 {
    TrainingConfig::default().regularization
}

fn default_num_factors() -> usize {
    TrainingConfig::default().num_factors
}

fn default_num_epochs() -> usize {
    TrainingConfig::default().num_epochs
}

fn default_init_std() -> f64 {
    TrainingConfig::default().init_std
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    /// Load configuration from explicit key/value pairs
    pub fn from_vars<I>(vars: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter::<_, Config>(vars).map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn rating_scale(&self) -> EngineResult<RatingScale> {
        RatingScale::new(self.rating_min, self.rating_max)
    }

    pub fn training(&self) -> TrainingConfig {
        TrainingConfig {
            learning_rate: self.learning_rate,
            regularization: self.regularization,
            num_factors: self.num_factors,
            num_epochs: self.num_epochs,
            random_seed: self.random_seed,
            init_std: self.init_std,
            ..TrainingConfig::default()
        }
    }

    /// Engine settings, validated up front so bad values fail at startup
    pub fn engine(&self) -> EngineResult<EngineConfig> {
        let training = self.training();
        training.validate()?;
        if !(0.0..1.0).contains(&self.test_fraction) {
            return Err(crate::error::EngineError::InvalidConfig(format!(
                "test_fraction must be in [0, 1), got {}",
                self.test_fraction
            )));
        }
        Ok(EngineConfig {
            training,
            test_fraction: self.test_fraction,
            split_seed: self.split_seed,
        })
    }
}
