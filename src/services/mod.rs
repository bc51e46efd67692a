pub mod factor_model;
pub mod rating_store;
pub mod recommendations;
pub mod recommender;
pub mod trainer;

pub use factor_model::{FactorModel, IdIndex, TrainedModel};
pub use rating_store::RatingStore;
pub use recommendations::{EngineConfig, RecommendationEngine};
pub use recommender::Recommender;
pub use trainer::{evaluate, EpochReport, Evaluation, Trainer, TrainingConfig};
