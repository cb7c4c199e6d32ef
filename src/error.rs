use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::api::types::ValidationErrors;
use crate::inference::EngineError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid API Key")]
    Unauthorized,

    #[error("invalid request: {0}")]
    Validation(#[from] ValidationErrors),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Engine(EngineError::ModelLoad(_))
            | ApiError::Engine(EngineError::Inference(_))
            | ApiError::Engine(EngineError::Worker(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Unauthorized => {
                warn!("rejected request with invalid API key");
                json!({ "detail": self.to_string() })
            }
            ApiError::Validation(errors) => json!({ "detail": errors.0 }),
            ApiError::Engine(e) => {
                error!(kind = e.kind(), error = %e, "generation failed");
                json!({ "detail": e.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}
