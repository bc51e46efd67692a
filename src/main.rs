use std::path::Path;

use tracing_subscriber::EnvFilter;

use movie_recs_api::api::{create_router, AppState};
use movie_recs_api::config::Config;
use movie_recs_api::services::{RatingStore, RecommendationEngine};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("movie_recs_api=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    let engine_config = config.engine()?;
    let scale = config.rating_scale()?;

    // Resume from the last snapshot when one exists
    let snapshot = config
        .model_path
        .as_deref()
        .filter(|path| Path::new(path).exists());
    let mut state = match snapshot {
        Some(path) => AppState::from_engine(RecommendationEngine::load(path)?, engine_config),
        None => AppState::new(
            RatingStore::with_policy(scale, config.duplicate_policy),
            engine_config,
        ),
    };
    if let Some(path) = &config.model_path {
        state = state.with_model_path(path.as_str());
    }

    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "Server running");
    axum::serve(listener, app).await?;

    Ok(())
}
