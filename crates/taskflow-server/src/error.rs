//! HTTP error mapping

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use taskflow_types::{PublishError, StoreError};
use thiserror::Error;
use utoipa::ToSchema;

/// API Error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiErrorBody {
    /// Error message
    pub error: String,
    /// Error code
    pub code: String,
}

/// Errors a handler can return
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error("Invalid request body: {0}")]
    BadRequest(String),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

impl AppError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::Store(StoreError::Duplicate(_)) => (StatusCode::CONFLICT, "DUPLICATE"),
            AppError::Store(StoreError::Invalid(_)) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            AppError::Publish(PublishError::Unavailable) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BROKER_UNAVAILABLE")
            }
            AppError::Publish(PublishError::Broker(_)) => {
                (StatusCode::SERVICE_UNAVAILABLE, "BROKER_ERROR")
            }
            AppError::Publish(PublishError::Serialize(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request failed");
        }

        let body = Json(ApiErrorBody {
            error: self.to_string(),
            code: code.to_string(),
        });

        (status, body).into_response()
    }
}
