//! Error-to-HTTP response conversion.
//!
//! Implements `IntoResponse` for [`rf_core::Error`] so that route handlers
//! can return `Result<T, rf_core::Error>` directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError {
    inner: rf_core::Error,
}

impl AppError {
    pub fn new(inner: rf_core::Error) -> Self {
        Self { inner }
    }
}

impl From<rf_core::Error> for AppError {
    fn from(e: rf_core::Error) -> Self {
        Self::new(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.inner.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error = %self.inner,
                "Server error in API handler"
            );
        }

        let code = match &self.inner {
            rf_core::Error::NotFound { .. } => "not_found",
            rf_core::Error::Validation(_) => "validation_error",
            rf_core::Error::Conflict(_) => "conflict",
            rf_core::Error::Database { .. } => "database_error",
            rf_core::Error::Io { .. } => "io_error",
            rf_core::Error::Activity { .. } => "activity_error",
            rf_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.inner.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_produces_404() {
        let err = AppError::new(rf_core::Error::not_found("run", "abc"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn conflict_produces_409() {
        let err = AppError::new(rf_core::Error::conflict("run r1 already exists"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn validation_produces_400() {
        let err = AppError::new(rf_core::Error::validation("script is required"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
