use std::fmt::Display;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::models::UserId;

/// Which side of the rating matrix an identifier belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    User,
    Item,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::User => write!(f, "user"),
            EntityKind::Item => write!(f, "item"),
        }
    }
}

/// Failures raised by the recommendation engine
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("rating {value} is outside the scale [{min}, {max}]")]
    RatingOutOfRange { value: f64, min: f64, max: f64 },

    #[error("unknown {entity} {id}: not part of the trained model")]
    UnknownEntity { entity: EntityKind, id: u64 },

    #[error("no {entity} at model index {index} (model has {len})")]
    UnknownIndex {
        entity: EntityKind,
        index: usize,
        len: usize,
    },

    #[error("User ID {0} not found in dataset")]
    UnknownUser(UserId),

    #[error("cannot train or evaluate on an empty rating set")]
    EmptyDataset,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("no model has been trained yet")]
    NotTrained,

    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
            AppError::Engine(err) => {
                let status = match &err {
                    EngineError::UnknownUser(_)
                    | EngineError::UnknownEntity { .. }
                    | EngineError::UnknownIndex { .. } => StatusCode::NOT_FOUND,
                    EngineError::RatingOutOfRange { .. } | EngineError::InvalidConfig(_) => {
                        StatusCode::BAD_REQUEST
                    }
                    EngineError::EmptyDataset => StatusCode::UNPROCESSABLE_ENTITY,
                    EngineError::NotTrained => StatusCode::CONFLICT,
                    EngineError::InvalidSnapshot(_)
                    | EngineError::Io(_)
                    | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
