//! API error type for sonara-se
//!
//! Every error renders as the standard response envelope with a stable
//! code and a fixed HTTP status; the message may be overridden per
//! occurrence.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sonara_common::{ApiResponse, ResponseType};
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing or invalid credentials (401)
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Shared domain error, mapped by variant
    #[error(transparent)]
    Common(#[from] sonara_common::Error),
}

impl ApiError {
    fn response_type(&self) -> ResponseType {
        match self {
            ApiError::BadRequest(_) => ResponseType::BadRequest,
            ApiError::Unauthorized(_) => ResponseType::Unauthorized,
            ApiError::NotFound(_) => ResponseType::NotFoundPage,
            ApiError::Internal(_) => ResponseType::ServerError,
            ApiError::Common(err) => match err {
                sonara_common::Error::DimensionMismatch { .. }
                | sonara_common::Error::InvalidInput(_) => ResponseType::BadRequest,
                sonara_common::Error::ReferenceNotFound(_)
                | sonara_common::Error::NotFound(_) => ResponseType::NotFoundPage,
                _ => ResponseType::ServerError,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let response_type = self.response_type();
        let status = StatusCode::from_u16(response_type.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body: ApiResponse<serde_json::Value> =
            ApiResponse::with_message(response_type, self.to_string());
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
