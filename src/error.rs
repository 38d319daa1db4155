use std::path::PathBuf;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

/// Failures a caller is expected to branch on. Everything else travels as
/// `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("could not read the message baseline: {0}")]
    Baseline(String),
    #[error("directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("no image/audio pairs found for reel {0}")]
    NoPairs(String),
    #[error("the {0} lane is already processing a job")]
    LaneBusy(&'static str),
    #[error("the {0} lane worker has stopped")]
    LaneClosed(&'static str),
}

/// Errors surfaced by the HTTP layer, each mapped to a status code.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Another job is currently in progress. Please wait.")]
    Busy { queue_position: usize },
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),
    #[error("{0}")]
    Internal(String),
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(format!("{:#}", err))
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Busy { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ApiError::Busy { queue_position } => json!({
                "success": false,
                "error": self.to_string(),
                "queue_position": queue_position,
            }),
            _ => json!({
                "success": false,
                "error": self.to_string(),
            }),
        };
        HttpResponse::build(self.status_code()).json(body)
    }
}
