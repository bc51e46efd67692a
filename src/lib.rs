pub mod api;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod services;

pub use error::{AppError, AppResult, EngineError, EngineResult};
pub use services::{EngineConfig, RatingStore, RecommendationEngine};
