use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult, EngineError};
use crate::middleware::request_id::RequestId;
use crate::models::{CatalogItem, ItemId, Rating, UserId};
use crate::services::{
    EngineConfig, EpochReport, Evaluation, RecommendationEngine, TrainingConfig,
};

use super::AppState;

const DEFAULT_RECOMMENDATIONS: usize = 10;

// Request/Response types

#[derive(Debug, Deserialize)]
pub struct AddRatingsRequest {
    pub ratings: Vec<Rating>,
}

#[derive(Debug, Serialize)]
pub struct AddRatingsResponse {
    pub accepted: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct TrainingSummary {
    pub users: usize,
    pub items: usize,
    pub observations: usize,
    pub factors: usize,
    pub trained_at: DateTime<Utc>,
    pub epochs: Vec<EpochReport>,
    pub evaluation: Option<Evaluation>,
}

impl From<&RecommendationEngine> for TrainingSummary {
    fn from(engine: &RecommendationEngine) -> Self {
        let model = engine.model();
        Self {
            users: model.users().len(),
            items: model.items().len(),
            observations: engine.store().len(),
            factors: model.factor_model().factors(),
            trained_at: model.trained_at(),
            epochs: model.history().to_vec(),
            evaluation: engine.evaluation().copied(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecommendQuery {
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct RecommendationResponse {
    pub item_id: ItemId,
    pub score: f64,
    pub title: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub score: f64,
}

fn round_score(score: f64) -> f64 {
    (score * 100.0).round() / 100.0
}

// Handlers

/// Health check endpoint
pub async fn health_check() -> StatusCode {
    StatusCode::OK
}

/// Ingest a batch of ratings
pub async fn add_ratings(
    State(state): State<AppState>,
    Json(request): Json<AddRatingsRequest>,
) -> AppResult<(StatusCode, Json<AddRatingsResponse>)> {
    let mut inner = state.inner.write().await;
    let accepted = inner.ratings.add_all(&request.ratings).map_err(|e| {
        tracing::warn!(error = %e, "Rejected rating batch");
        e
    })?;

    tracing::info!(accepted, total = inner.ratings.len(), "Ratings ingested");

    Ok((
        StatusCode::CREATED,
        Json(AddRatingsResponse {
            accepted,
            total: inner.ratings.len(),
        }),
    ))
}

/// Items a user has rated, ascending by id
pub async fn get_user_ratings(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Json<Vec<ItemId>> {
    let inner = state.inner.read().await;
    Json(inner.ratings.rated_items(user_id).iter().copied().collect())
}

/// Register catalog metadata
pub async fn add_items(
    State(state): State<AppState>,
    Json(items): Json<Vec<CatalogItem>>,
) -> (StatusCode, Json<Vec<CatalogItem>>) {
    let mut inner = state.inner.write().await;
    for item in &items {
        inner.ratings.add_item(item.item_id);
        inner.catalog.insert(item.item_id, item.clone());
    }
    tracing::info!(added = items.len(), catalog = inner.catalog.len(), "Catalog updated");

    (StatusCode::CREATED, Json(items))
}

/// List the catalog
pub async fn get_items(State(state): State<AppState>) -> Json<Vec<CatalogItem>> {
    let inner = state.inner.read().await;
    Json(inner.catalog.values().cloned().collect())
}

/// Train a new engine on the ratings ingested so far
pub async fn train(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> AppResult<Json<TrainingSummary>> {
    let config = EngineConfig {
        training: training_overrides(&body, &state.engine_config.training).map_err(|e| {
            tracing::warn!(request_id = %request_id, error = %e, "Rejected training overrides");
            e
        })?,
        ..(*state.engine_config).clone()
    };
    let (ratings, catalog) = {
        let inner = state.inner.read().await;
        (inner.ratings.clone(), inner.catalog.clone())
    };

    tracing::info!(
        request_id = %request_id,
        observations = ratings.len(),
        "Processing training request"
    );

    let model_path = state.model_path.clone();
    let engine = tokio::task::spawn_blocking(move || {
        let engine = RecommendationEngine::train(ratings, &config)?
            .with_catalog(catalog.into_values());
        if let Some(path) = model_path.as_deref() {
            engine.save(path)?;
        }
        Ok::<_, EngineError>(engine)
    })
    .await
    .map_err(|e| AppError::Internal(format!("training task failed: {e}")))??;

    let summary = TrainingSummary::from(&engine);
    state.inner.write().await.engine = Some(Arc::new(engine));

    tracing::info!(request_id = %request_id, "Training completed");

    Ok(Json(summary))
}

/// An empty body trains with the configured defaults; anything else must be
/// a valid [`TrainingConfig`]
fn training_overrides(body: &[u8], defaults: &TrainingConfig) -> AppResult<TrainingConfig> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(defaults.clone());
    }
    serde_json::from_slice(body)
        .map_err(|e| AppError::InvalidInput(format!("invalid training overrides: {e}")))
}

/// Describe the currently served model
pub async fn get_model(State(state): State<AppState>) -> AppResult<Json<TrainingSummary>> {
    let inner = state.inner.read().await;
    let engine = inner.engine.as_ref().ok_or(EngineError::NotTrained)?;
    Ok(Json(TrainingSummary::from(engine.as_ref())))
}

/// Top-N unseen items for a user
pub async fn recommend(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<UserId>,
    Query(query): Query<RecommendQuery>,
) -> AppResult<Json<Vec<RecommendationResponse>>> {
    let n = query.n.unwrap_or(DEFAULT_RECOMMENDATIONS);
    let inner = state.inner.read().await;
    let engine = inner.engine.as_ref().ok_or(EngineError::NotTrained)?;

    let recommendations = engine.recommend(user_id, n).map_err(|e| {
        tracing::info!(request_id = %request_id, user_id, error = %e, "Recommendation refused");
        e
    })?;

    tracing::info!(
        request_id = %request_id,
        user_id,
        requested = n,
        returned = recommendations.len(),
        "Recommendations served"
    );

    let response = recommendations
        .into_iter()
        .map(|rec| {
            let item = inner.catalog.get(&rec.item_id);
            RecommendationResponse {
                item_id: rec.item_id,
                score: round_score(rec.score),
                title: item.map(|i| i.title.clone()),
                link: item.and_then(|i| i.link.clone()),
            }
        })
        .collect();

    Ok(Json(response))
}

/// Predicted rating for one (user, item) pair
pub async fn predict(
    State(state): State<AppState>,
    Path((user_id, item_id)): Path<(UserId, ItemId)>,
) -> AppResult<Json<PredictionResponse>> {
    let inner = state.inner.read().await;
    let engine = inner.engine.as_ref().ok_or(EngineError::NotTrained)?;
    let score = engine.predict(user_id, item_id)?;

    Ok(Json(PredictionResponse {
        user_id,
        item_id,
        score,
    }))
}
