//!
//! Error handling for the Anthropic-to-OpenAI protocol translation proxy.
//!
//! Defines all error types used throughout the application using thiserror
//! for ergonomic error handling. Follows Rust best practices for error design.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/* --- types ----------------------------------------------------------------------------------- */

///
/// Application error types following Rust best practices.
///
/// Covers all possible error conditions that can occur during proxy operation.
/// Uses thiserror for automatic Display and Error trait implementations.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found")]
    NotFound,

    #[error("Upstream returned {status}: {body}")]
    UpstreamHttp { status: StatusCode, body: String },

    #[error("Upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

/* --- start of code -------------------------------------------------------------------------- */

/// Result type alias for cleaner error handling throughout the application
pub type Result<T> = std::result::Result<T, ProxyError>;

impl IntoResponse for ProxyError {
    ///
    /// Render a `ProxyError` as the `{"error":{"type","message","code"}}`
    /// envelope the front door promises callers, picking the status code
    /// and `type` tag per variant.
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ProxyError::InvalidRequest(_) | ProxyError::Conversion(_) | ProxyError::Serialization(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request")
            }
            ProxyError::Auth(_) => (StatusCode::UNAUTHORIZED, "auth_error"),
            ProxyError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ProxyError::UpstreamHttp { status, .. } => (*status, "upstream_http_error"),
            ProxyError::UpstreamUnreachable(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
            ProxyError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            ProxyError::Request(_) => (StatusCode::BAD_GATEWAY, "upstream_error"),
        };

        // UpstreamHttp carries an already-formed upstream body; forward it
        // instead of wrapping it a second time.
        if let ProxyError::UpstreamHttp { body, .. } = &self {
            if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(body) {
                return (status, Json(parsed)).into_response();
            }
            return (status, body.clone()).into_response();
        }

        let payload = json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
                "code": status.as_u16(),
            }
        });
        (status, Json(payload)).into_response()
    }
}
