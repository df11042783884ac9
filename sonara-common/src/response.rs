//! Response envelope shared by the HTTP surface and the outbound callback.
//!
//! Every response body is `{code, message, payload}` with a stable
//! short code per outcome class. The payload is `null` for error
//! responses and for success responses that carry no data.

use serde::{Deserialize, Serialize};

/// Stable response outcome classes, each with a fixed HTTP status and a
/// default message. The message may be overridden per occurrence; the code
/// and status never vary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseType {
    /// HTTP 200
    Success,
    /// HTTP 400
    BadRequest,
    /// HTTP 401
    Unauthorized,
    /// HTTP 404
    NotFoundPage,
    /// HTTP 500
    ServerError,
}

impl ResponseType {
    /// Short stable code carried in the envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ResponseType::Success => "SU",
            ResponseType::BadRequest => "BR",
            ResponseType::Unauthorized => "UNA",
            ResponseType::NotFoundPage => "NFP",
            ResponseType::ServerError => "SER",
        }
    }

    /// Fixed HTTP status for this outcome class.
    pub fn status_code(&self) -> u16 {
        match self {
            ResponseType::Success => 200,
            ResponseType::BadRequest => 400,
            ResponseType::Unauthorized => 401,
            ResponseType::NotFoundPage => 404,
            ResponseType::ServerError => 500,
        }
    }

    /// Default message, used when no per-occurrence message is supplied.
    pub fn default_message(&self) -> &'static str {
        match self {
            ResponseType::Success => "Request processed successfully.",
            ResponseType::BadRequest => "Bad request.",
            ResponseType::Unauthorized => "Unauthorized.",
            ResponseType::NotFoundPage => "Page not found.",
            ResponseType::ServerError => "Internal server error.",
        }
    }
}

/// Common API response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Response code (2-4 characters)
    pub code: String,
    /// Response message
    pub message: String,
    /// Response payload, `null` when absent
    pub payload: Option<T>,
}

impl<T> ApiResponse<T> {
    /// Successful envelope wrapping a payload.
    pub fn success(payload: T) -> Self {
        Self {
            code: ResponseType::Success.code().to_string(),
            message: ResponseType::Success.default_message().to_string(),
            payload: Some(payload),
        }
    }

    /// Envelope for the given outcome class with its default message.
    pub fn of(response_type: ResponseType) -> Self {
        Self {
            code: response_type.code().to_string(),
            message: response_type.default_message().to_string(),
            payload: None,
        }
    }

    /// Envelope for the given outcome class with an overridden message.
    pub fn with_message(response_type: ResponseType, message: impl Into<String>) -> Self {
        Self {
            code: response_type.code().to_string(),
            message: message.into(),
            payload: None,
        }
    }
}
