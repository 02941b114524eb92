//! API error types and HTTP response conversion
//!
//! Maps [`ServerError`] kinds onto HTTP status codes and a JSON
//! `{error, message, code}` body.

use crate::errors::ServerError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// API error response structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Error code for programmatic handling
    pub code: String,
}

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

/// Boundary error: a core error plus its HTTP shape
#[derive(Debug)]
pub struct ApiError(pub ServerError);

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Conflict(_) => StatusCode::CONFLICT,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Timeout => StatusCode::REQUEST_TIMEOUT,
            ServerError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::Cancelled
            | ServerError::Fatal(_)
            | ServerError::Io(_)
            | ServerError::Serialization(_)
            | ServerError::Checkpoint(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code identifier
    pub fn code(&self) -> &'static str {
        match &self.0 {
            ServerError::NotFound(_) => "NOT_FOUND",
            ServerError::Conflict(_) => "CONFLICT",
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::Validation(_) => "VALIDATION_ERROR",
            ServerError::Timeout => "TIMEOUT",
            ServerError::Cancelled => "CANCELLED",
            ServerError::Transient(_) => "TRANSIENT",
            ServerError::Fatal(_) => "FATAL",
            ServerError::Io(_) => "IO_ERROR",
            ServerError::Serialization(_) => "SERIALIZATION_ERROR",
            ServerError::Checkpoint(_) => "CHECKPOINT_ERROR",
        }
    }

    /// Get the error type name
    pub fn error_type(&self) -> &'static str {
        match &self.0 {
            ServerError::NotFound(_) => "NotFound",
            ServerError::Conflict(_) => "Conflict",
            ServerError::BadRequest(_) => "BadRequest",
            ServerError::Validation(_) => "ValidationError",
            ServerError::Timeout => "Timeout",
            ServerError::Cancelled => "Cancelled",
            ServerError::Transient(_) => "Transient",
            ServerError::Fatal(_) => "Fatal",
            ServerError::Io(_) => "IoError",
            ServerError::Serialization(_) => "SerializationError",
            ServerError::Checkpoint(_) => "CheckpointError",
        }
    }

    /// Shorthand for a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self(ServerError::Validation(message.into()))
    }
}

impl From<ServerError> for ApiError {
    fn from(err: ServerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse {
            error: self.error_type().to_string(),
            message: self.0.to_string(),
            code: self.code().to_string(),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = ?body, "API error");
        } else {
            tracing::debug!(status = %status, error = ?body, "API error");
        }

        (status, Json(body)).into_response()
    }
}
