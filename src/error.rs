//! Error taxonomy for the scheduler.
//!
//! Four failure classes cross the HTTP boundary:
//! - `NotFound`   → 404 (unknown session / participant / transcript set)
//! - `BadRequest` → 400 (missing required field)
//! - `Upstream`   → 502 (text-generation call failed or was unparseable)
//! - `Database`   → 500

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use thiserror::Error;

/// Scheduler-wide error type.
#[derive(Debug, Error)]
pub enum GdError {
    /// The identified entity does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The request is missing a required field or carries an invalid value.
    #[error("{0}")]
    BadRequest(String),

    /// The text-generation service failed or returned unusable content.
    #[error("{0}")]
    Upstream(String),

    /// Underlying store failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, GdError>;

impl IntoResponse for GdError {
    fn into_response(self) -> Response {
        let status = match &self {
            GdError::NotFound(_) => StatusCode::NOT_FOUND,
            GdError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GdError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GdError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("request failed: {}", self);
        }

        let body = serde_json::json!({ "detail": self.to_string() });
        (status, Json(body)).into_response()
    }
}
