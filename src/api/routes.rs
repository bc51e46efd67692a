use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::request_id::{make_span_with_request_id, request_id_middleware};

use super::handlers;
use super::AppState;

/// Creates the main API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        // Ingestion
        .route("/ratings", post(handlers::add_ratings))
        .route("/users/:user_id/ratings", get(handlers::get_user_ratings))
        .route("/items", get(handlers::get_items).post(handlers::add_items))
        // Model lifecycle
        .route("/train", post(handlers::train))
        .route("/model", get(handlers::get_model))
        // Queries
        .route(
            "/users/:user_id/recommendations",
            get(handlers::recommend),
        )
        .route(
            "/users/:user_id/items/:item_id/prediction",
            get(handlers::predict),
        )
        .layer(
            ServiceBuilder::new()
                .layer(middleware::from_fn(request_id_middleware))
                .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
