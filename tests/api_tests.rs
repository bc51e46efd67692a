use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use serde_json::{json, Value};

use movie_recs_api::api::{create_router, AppState};
use movie_recs_api::services::RecommendationEngine;

fn create_test_server() -> TestServer {
    create_server_with(AppState::default())
}

fn create_server_with(state: AppState) -> TestServer {
    let app = create_router(state);
    TestServer::new(app).unwrap()
}

async fn seed_scenario(server: &TestServer) {
    let response = server
        .post("/items")
        .json(&json!([
            { "item_id": 10, "title": "Toy Story (1995)", "genres": ["Animation"] },
            { "item_id": 20, "title": "Jumanji (1995)" },
            {
                "item_id": 30,
                "title": "Heat (1995)",
                "link": "https://www.imdb.com/title/tt0113277/"
            }
        ]))
        .await;
    response.assert_status(StatusCode::CREATED);

    let response = server
        .post("/ratings")
        .json(&json!({
            "ratings": [
                { "user_id": 1, "item_id": 10, "value": 5.0 },
                { "user_id": 1, "item_id": 20, "value": 1.0 },
                { "user_id": 2, "item_id": 10, "value": 4.0 }
            ]
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
}

async fn train_small(server: &TestServer) -> Value {
    let response = server
        .post("/train")
        .json(&json!({ "num_factors": 4, "num_epochs": 10 }))
        .await;
    response.assert_status_ok();
    response.json()
}

#[tokio::test]
async fn test_health_check() {
    let server = create_test_server();
    let response = server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = create_test_server();
    let id = "6f1c2f4e-8f7a-4a53-9d43-0f3f2b2f6c11";

    let response = server
        .get("/health")
        .add_header(
            HeaderName::from_static("x-request-id"),
            HeaderValue::from_static(id),
        )
        .await;
    assert_eq!(response.headers().get("x-request-id").unwrap(), id);

    let response = server.get("/health").await;
    assert!(response.headers().get("x-request-id").is_some());
}

#[tokio::test]
async fn test_ingest_ratings_and_items() {
    let server = create_test_server();
    seed_scenario(&server).await;

    let response = server.get("/users/1/ratings").await;
    response.assert_status_ok();
    let rated: Vec<u32> = response.json();
    assert_eq!(rated, vec![10, 20]);

    let response = server.get("/users/42/ratings").await;
    let rated: Vec<u32> = response.json();
    assert!(rated.is_empty());

    let response = server.get("/items").await;
    let items: Vec<Value> = response.json();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["title"], "Toy Story (1995)");
}

#[tokio::test]
async fn test_out_of_range_batch_is_rejected() {
    let server = create_test_server();

    let response = server
        .post("/ratings")
        .json(&json!({
            "ratings": [
                { "user_id": 1, "item_id": 10, "value": 4.0 },
                { "user_id": 1, "item_id": 20, "value": 6.0 }
            ]
        }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"].as_str().unwrap().contains("outside the scale"));

    let response = server.get("/users/1/ratings").await;
    let rated: Vec<u32> = response.json();
    assert!(rated.is_empty());
}

#[tokio::test]
async fn test_train_and_recommend_flow() {
    let server = create_test_server();
    seed_scenario(&server).await;

    let summary = train_small(&server).await;
    assert_eq!(summary["users"], 2);
    assert_eq!(summary["items"], 3);
    assert_eq!(summary["observations"], 3);
    assert_eq!(summary["epochs"].as_array().unwrap().len(), 10);

    let response = server.get("/users/1/recommendations").await;
    response.assert_status_ok();
    let recs: Vec<Value> = response.json();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0]["item_id"], 30);
    assert_eq!(recs[0]["title"], "Heat (1995)");
    assert_eq!(recs[0]["link"], "https://www.imdb.com/title/tt0113277/");
    let score = recs[0]["score"].as_f64().unwrap();
    assert!((0.5..=5.0).contains(&score));

    let response = server.get("/users/2/recommendations?n=1").await;
    let recs: Vec<Value> = response.json();
    assert_eq!(recs.len(), 1);
    assert_ne!(recs[0]["item_id"], 10);

    let response = server.get("/model").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_unknown_user_is_not_found() {
    let server = create_test_server();
    seed_scenario(&server).await;
    train_small(&server).await;

    let response = server.get("/users/99/recommendations").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["error"], "User ID 99 not found in dataset");
}

#[tokio::test]
async fn test_prediction_endpoint() {
    let server = create_test_server();
    seed_scenario(&server).await;
    train_small(&server).await;

    let response = server.get("/users/2/items/30/prediction").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user_id"], 2);
    assert_eq!(body["item_id"], 30);

    let response = server.get("/users/99/items/10/prediction").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_queries_before_training_conflict() {
    let server = create_test_server();
    seed_scenario(&server).await;

    server
        .get("/users/1/recommendations")
        .await
        .assert_status(StatusCode::CONFLICT);
    server.get("/model").await.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_training_errors() {
    let server = create_test_server();

    let response = server.post("/train").await;
    response.assert_status(StatusCode::UNPROCESSABLE_ENTITY);

    seed_scenario(&server).await;
    let response = server
        .post("/train")
        .json(&json!({ "num_factors": 0 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_training_overrides_are_rejected() {
    let server = create_test_server();
    seed_scenario(&server).await;

    let response = server
        .post("/train")
        .json(&json!({ "num_factors": "abc", "num_epochs": -3 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert!(body["error"]
        .as_str()
        .unwrap()
        .starts_with("invalid training overrides"));

    // Nothing was trained with the defaults instead
    server.get("/model").await.assert_status(StatusCode::CONFLICT);

    let response = server.post("/train").text("{not json").await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_training_writes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("engine.json");
    let path_str = path.to_str().unwrap().to_string();

    let server = create_server_with(AppState::default().with_model_path(path_str.as_str()));
    seed_scenario(&server).await;
    train_small(&server).await;

    let engine = RecommendationEngine::load(&path).unwrap();
    let recs = engine.recommend(1, 5).unwrap();
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0].item_id, 30);

    // A server resumed from the snapshot answers without retraining
    let resumed = create_server_with(AppState::from_engine(engine, Default::default()));
    let response = resumed.get("/users/1/recommendations").await;
    response.assert_status_ok();
    let recs: Vec<Value> = response.json();
    assert_eq!(recs[0]["title"], "Heat (1995)");
    assert_eq!(recs[0]["link"], "https://www.imdb.com/title/tt0113277/");

    let items: Vec<Value> = resumed.get("/items").await.json();
    assert_eq!(items.len(), 3);
}
