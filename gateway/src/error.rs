//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use batchq_common::{StoreError, TensorError};
use serde_json::json;
use thiserror::Error;

use crate::waiter::WaitError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    JobFailed(String),

    #[error("{0}")]
    CorruptResult(String),

    #[error("{0}")]
    StoreUnavailable(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::JobFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::CorruptResult(_) => StatusCode::BAD_GATEWAY,
            ApiError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::JobFailed(_) => "job_failed",
            ApiError::CorruptResult(_) => "corrupt_result",
            ApiError::StoreUnavailable(_) => "store_unavailable",
            ApiError::Timeout(_) => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl From<WaitError> for ApiError {
    fn from(e: WaitError) -> Self {
        match e {
            WaitError::Timeout(_) => ApiError::Timeout(e.to_string()),
            WaitError::JobFailed { .. } => ApiError::JobFailed(e.to_string()),
            WaitError::CorruptResult { .. } => ApiError::CorruptResult(e.to_string()),
            WaitError::Encode(_) => ApiError::Internal(e.to_string()),
            WaitError::Store(StoreError::Unavailable(_)) => ApiError::StoreUnavailable(e.to_string()),
            WaitError::Store(StoreError::Encoding(_)) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<TensorError> for ApiError {
    fn from(e: TensorError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        ApiError::BadRequest(e.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "Request failed: {}", self);
        }
        let body = json!({
            "success": false,
            "error": {
                "type": self.kind(),
                "message": self.to_string(),
            }
        });
        (status, Json(body)).into_response()
    }
}
