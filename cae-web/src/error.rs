//! Error types for cae-web

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Capture form validation (400, flat `{"error": "..."}` body)
    #[error("{0}")]
    Validation(&'static str),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload over the body limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// No result within the request timeout (504)
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),

    /// Store or broker unreachable (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<cae_common::Error> for ApiError {
    fn from(err: cae_common::Error) -> Self {
        use cae_common::Error;

        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::ProcessingFailed(msg) => ApiError::ProcessingFailed(msg),
            Error::Decode(msg) | Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::StorageUnavailable(msg) | Error::BrokerUnavailable(msg) => {
                ApiError::Unavailable(msg)
            }
            other if other.is_transient() => ApiError::Unavailable(other.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Malformed or truncated multipart bodies are 400; oversized ones keep their 413
impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::Validation(msg) => {
                return (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response();
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::ProcessingFailed(msg) => {
                (StatusCode::GATEWAY_TIMEOUT, "PROCESSING_FAILED", msg)
            }
            ApiError::Unavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_error_mapping() {
        let cases = [
            (cae_common::Error::NotFound("x".into()), StatusCode::NOT_FOUND),
            (
                cae_common::Error::ProcessingFailed("x".into()),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                cae_common::Error::StorageUnavailable("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (cae_common::Error::Decode("x".into()), StatusCode::BAD_REQUEST),
            (
                cae_common::Error::Internal("x".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            let response = ApiError::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_validation_is_bad_request() {
        let response = ApiError::Validation("No image part").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
