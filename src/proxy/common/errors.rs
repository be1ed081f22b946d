// Canonical error taxonomy and its three client-facing shapes.
//
// OpenAI:    {"error": {"message", "type", "code"}}
// Anthropic: {"type": "error", "error": {"type", "message"}}
// Gemini:    {"error": {"code", "message", "status"}}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;

/// Client dialect a request arrived in; selects the error body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    OpenAi,
    Anthropic,
    Gemini,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    RateLimit(String),

    #[error("{0}")]
    Timeout(String),

    #[error("upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("{0}")]
    Internal(String),
}

impl From<AuthError> for GatewayError {
    fn from(e: AuthError) -> Self {
        GatewayError::TokenRefresh(e.to_string())
    }
}

impl GatewayError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            GatewayError::Authentication(_) | GatewayError::TokenRefresh(_) => {
                StatusCode::UNAUTHORIZED
            }
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::RateLimit(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn openai_type(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) | GatewayError::TokenRefresh(_) => {
                "authentication_error"
            }
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::RateLimit(_) => "rate_limit_error",
            GatewayError::Timeout(_) => "timeout_error",
            GatewayError::Upstream { .. } | GatewayError::Internal(_) => "api_error",
        }
    }

    fn anthropic_type(&self) -> &'static str {
        match self {
            GatewayError::Authentication(_) | GatewayError::TokenRefresh(_) => {
                "authentication_error"
            }
            GatewayError::Validation(_) => "invalid_request_error",
            GatewayError::RateLimit(_) => "rate_limit_error",
            GatewayError::Timeout(_) | GatewayError::Upstream { .. } | GatewayError::Internal(_) => {
                "api_error"
            }
        }
    }

    pub fn body_for(&self, dialect: Dialect) -> Value {
        let status = self.http_status().as_u16();
        match dialect {
            Dialect::OpenAi => json!({
                "error": {
                    "message": self.to_string(),
                    "type": self.openai_type(),
                    "code": status
                }
            }),
            Dialect::Anthropic => json!({
                "type": "error",
                "error": {
                    "type": self.anthropic_type(),
                    "message": self.to_string()
                }
            }),
            Dialect::Gemini => json!({
                "error": {
                    "code": status,
                    "message": self.to_string(),
                    "status": gemini_status(status)
                }
            }),
        }
    }
}

/// Maps an HTTP status to the Gemini error `status` string.
pub fn gemini_status(status: u16) -> &'static str {
    match status {
        400 => "INVALID_ARGUMENT",
        401 => "UNAUTHENTICATED",
        403 => "PERMISSION_DENIED",
        404 => "NOT_FOUND",
        429 => "RESOURCE_EXHAUSTED",
        500..=599 => "INTERNAL",
        _ => "UNKNOWN",
    }
}

/// Build the dialect-appropriate HTTP error response.
pub fn error_response(dialect: Dialect, error: &GatewayError) -> Response {
    (error.http_status(), Json(error.body_for(dialect))).into_response()
}
