//! API error types and helpers.
//!
//! # Purpose and responsibility
//! Turns service errors and request rejections into the uniform
//! `{code, message, request_id}` body every admin endpoint returns.
//!
//! # Key invariants and assumptions
//! - `code` is one of `validation_error`, `not_found`, `conflict`,
//!   `unreachable` or `internal`, and always agrees with the status.
//! - Storage details are logged server-side and never echoed to the caller.
use crate::api::types::ErrorResponse;
use crate::error::CcError;
use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::IntoResponse;

/// Structured API error returned by handlers.
///
/// # Invariants
/// - `status` must match the semantics of `body.code`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
                request_id: None,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Build a 400 Bad Request validation error.
pub fn api_validation_error(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn api_not_found(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn api_conflict(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "conflict", message)
}

/// Build a 502 Bad Gateway error for a proxy that could not be reached.
pub fn api_unreachable(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_GATEWAY, "unreachable", message)
}

/// Build a 500 Internal Server Error, logging the cause.
///
/// # What it does
/// Logs `err` with the request context and returns `message` to the caller.
pub fn api_internal(message: &str, err: &dyn std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "proxy-cc storage error");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

impl From<CcError> for ApiError {
    fn from(err: CcError) -> Self {
        match err {
            CcError::Validation(err) => api_validation_error(err.to_string()),
            CcError::NotFound(what) => api_not_found(format!("{what} not found")),
            CcError::Conflict(what) => api_conflict(what),
            err @ CcError::Unreachable { .. } => api_unreachable(err.to_string()),
            CcError::Storage(err) => api_internal("storage unavailable", &err),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        api_validation_error(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        api_validation_error(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    #[test]
    fn service_errors_map_to_status_and_code() {
        let cases = [
            (
                CcError::Validation(ValidationError::EmptyName),
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (
                CcError::NotFound("namespace shop".into()),
                StatusCode::NOT_FOUND,
                "not_found",
            ),
            (
                CcError::Conflict("namespace shop is at revision 2, expected 1".into()),
                StatusCode::CONFLICT,
                "conflict",
            ),
            (
                CcError::Unreachable {
                    addr: "10.0.0.1:13307".into(),
                    reason: "timed out after 3000ms".into(),
                },
                StatusCode::BAD_GATEWAY,
                "unreachable",
            ),
            (
                CcError::Storage(anyhow::anyhow!("pool closed")),
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal",
            ),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status, status);
            assert_eq!(api.body.code, code);
            assert!(api.body.request_id.is_none());
        }
    }

    #[test]
    fn messages_carry_error_text_but_hide_storage_details() {
        let api = ApiError::from(CcError::NotFound("namespace shop".into()));
        assert_eq!(api.body.message, "namespace shop not found");

        let api = ApiError::from(CcError::Storage(anyhow::anyhow!("password=hunter2")));
        assert_eq!(api.body.message, "storage unavailable");
    }
}
