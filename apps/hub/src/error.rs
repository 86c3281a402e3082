//! Error handling for the hub's HTTP surface
//!
//! Protocol-level errors travel inside WebSocket `error` frames and never
//! reach this type; this is the unified error for plain HTTP handlers,
//! with status mapping via axum's IntoResponse.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use hearth_statestore::StoreError;

/// HTTP error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for client-side handling
    pub code: &'static str,
    /// Human-readable error message
    pub message: String,
}

/// Hub HTTP error type
#[derive(Error, Debug)]
pub enum HubError {
    /// The external state store failed or is unreachable
    #[error(transparent)]
    Upstream(#[from] StoreError),

    /// Unexpected internal failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl HubError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            HubError::Upstream(StoreError::Unavailable(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UPSTREAM_UNAVAILABLE")
            }
            HubError::Upstream(StoreError::Request(_)) => {
                (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR")
            }
            HubError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::error!(code, error = %self, "HTTP request failed");
        }
        let body = ErrorResponse {
            code,
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Convenience result alias for HTTP handlers
pub type HubResult<T> = Result<T, HubError>;
