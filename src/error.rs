use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde_json::json;
use thiserror::Error;

/// Failures raised while scoring a feature row.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InferenceError {
    #[error("model expects feature '{0}' which is not in the feature schema")]
    ColumnMismatch(String),

    #[error("feature length mismatch: got {got}, expected {expected}")]
    ShapeMismatch { got: usize, expected: usize },

    #[error("model returned no output")]
    EmptyOutput,

    #[error("model returned a non-finite value ({0})")]
    NonFinite(f64),

    #[error("{0}")]
    Backend(String),
}

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Prediction failed: {0}")]
    Inference(#[from] InferenceError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Inference(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::BadRequest(msg) => tracing::warn!("bad request: {}", msg),
            ApiError::Inference(e) => tracing::error!("inference failed: {}", e),
        }
        (self.status(), Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
