//! JSON error responses.

use std::time::Duration;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sandchat_core::ValidationError;
use sandchat_core::event::{MAX_ERROR_DETAIL, truncate_chars};
use serde_json::json;

use crate::producer::ProducerError;
use crate::relay::RelayError;

/// Failures reported to HTTP callers as `{"error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Failed to process request")]
    Producer(#[from] ProducerError),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Shell execution is disabled")]
    ShellDisabled,
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::Validation(e) => Self::Validation(e),
            RelayError::Producer(e) => Self::Producer(e),
            RelayError::Timeout(after) => Self::Timeout(after),
        }
    }
}

impl ApiError {
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Producer(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ShellDisabled => StatusCode::FORBIDDEN,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            Self::Producer(cause) => {
                let detail = cause.to_string();
                json!({
                    "error": self.to_string(),
                    "debug": { "message": truncate_chars(&detail, MAX_ERROR_DETAIL) },
                })
            }
            _ => json!({ "error": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}
