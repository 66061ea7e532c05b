//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use riskguard_core::{CheckError, RuleError};
use serde::Serialize;
use thiserror::Error;

/// API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Bad request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Decision pipeline rejected the input.
    #[error("{0}")]
    Check(#[from] CheckError),

    /// Rule reload failed.
    #[error("{0}")]
    Rules(#[from] RuleError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Status code and machine-readable code for this error.
    pub fn status(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Check(CheckError::EmptyContent) => (StatusCode::BAD_REQUEST, "empty_content"),
            ApiError::Check(CheckError::EmptyBatch) => (StatusCode::BAD_REQUEST, "empty_batch"),
            ApiError::Check(_) => (StatusCode::INTERNAL_SERVER_ERROR, "check_failed"),
            ApiError::Rules(RuleError::NoSource) => (StatusCode::BAD_REQUEST, "no_rule_file"),
            ApiError::Rules(_) => (StatusCode::INTERNAL_SERVER_ERROR, "rule_error"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Error body, also used for WebSocket error frames.
    pub fn body(&self) -> ErrorResponse {
        ErrorResponse {
            success: false,
            error: self.to_string(),
            code: self.status().1.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, _) = self.status();
        (status, axum::Json(self.body())).into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;
