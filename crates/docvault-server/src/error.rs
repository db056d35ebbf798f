//! Mapping of domain errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use docvault_core::{Error, ErrorKind};

/// An error response: `{"detail": "..."}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }

    /// Logged in full; clients only see a generic message.
    pub fn internal(detail: impl Into<String>) -> Self {
        let detail = detail.into();
        error!("Internal error: {}", detail);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            detail: "internal server error".to_string(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match e.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => return Self::internal(e.to_string()),
        };
        let detail = match e {
            Error::UserNotFound(id) => format!(
                "user with id: {} does not exist in db. Register user first",
                id
            ),
            Error::DocumentNotFound(id) => format!("doc with id: {} does not exist in db", id),
            Error::DuplicateUser(id) => format!("user with id: {} already exists in db", id),
            Error::InvalidEmail(msg)
            | Error::UnsupportedContent(msg)
            | Error::Extraction(msg)
            | Error::InvalidInput(msg) => msg,
            other => other.to_string(),
        };
        Self { status, detail }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "detail": self.detail })),
        )
            .into_response()
    }
}

/// Success body: `{"detail": "...", "content": ...}`.
pub fn reply(detail: impl Into<String>, content: impl Serialize) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "detail": detail.into(),
        "content": content,
    }))
}
