//! Error type definitions for the streaming proxy.
//!
//! `AppError` is the single taxonomy the rest of the crate converts into.
//! Each variant maps to exactly one HTTP status and a short public `kind`,
//! and the whole thing implements `IntoResponse` so handlers can just use
//! `?` and let the router render the redacted envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Top-level application error type.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    #[error("unsupported platform: {0}")]
    UnsupportedPlatform(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("timeout")]
    Timeout,

    #[error("range not satisfiable")]
    RangeNotSatisfiable,

    #[error("extractor protocol error: {0}")]
    ExtractorProtocolError(String),

    #[error("extractor internal error: {0}")]
    ExtractorInternalError(String),

    /// Never surfaced to a client directly. Callers that hit this treat it
    /// as "no cache" and fall through to the origin of truth, per the
    /// cache's fail-open contract.
    #[error("cache unavailable")]
    CacheUnavailable,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            AppError::UnsupportedPlatform(_) => (StatusCode::BAD_REQUEST, "unsupported_platform"),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::UpstreamUnavailable => (StatusCode::BAD_GATEWAY, "upstream_unavailable"),
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            AppError::RangeNotSatisfiable => {
                (StatusCode::RANGE_NOT_SATISFIABLE, "range_not_satisfiable")
            }
            AppError::ExtractorProtocolError(_) => {
                (StatusCode::BAD_GATEWAY, "extractor_protocol_error")
            }
            AppError::ExtractorInternalError(_) => {
                (StatusCode::BAD_GATEWAY, "extractor_internal_error")
            }
            AppError::CacheUnavailable => (StatusCode::INTERNAL_SERVER_ERROR, "cache_unavailable"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    /// Create a bad-request error with a custom message.
    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        Self::BadRequest(message.into())
    }

    /// Create an internal error with a custom message.
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Short public error kind, the same string rendered in the redacted
    /// response body's `error` field. Used by the audit log so a denial's
    /// reason (`ip_blocked`, `rate_limited`, ...) is recoverable from the
    /// audit trail alone.
    pub fn kind(&self) -> &'static str {
        self.status_and_kind().1
    }

    /// Detail string for development-mode error responses. Never includes
    /// upstream URLs, extractor stdout/stderr, or filesystem paths — those
    /// never make it into an `AppError` message in the first place.
    fn detail(&self) -> String {
        self.to_string()
    }
}

impl From<crate::models::UnsupportedPlatformError> for AppError {
    fn from(e: crate::models::UnsupportedPlatformError) -> Self {
        AppError::UnsupportedPlatform(e.0)
    }
}

impl From<crate::models::InvalidQualityError> for AppError {
    fn from(e: crate::models::InvalidQualityError) -> Self {
        AppError::BadRequest(format!("invalid quality: {}", e.0))
    }
}

#[derive(Serialize)]
struct ErrorBody {
    success: bool,
    error: &'static str,
    code: u16,
    timestamp: chrono::DateTime<chrono::Utc>,
    request_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

/// Request-scoped wrapper that renders `AppError` into the redacted
/// envelope, carrying the request id and the detailed-errors toggle that
/// plain `AppError::into_response` doesn't have access to.
pub struct Redacted {
    pub error: AppError,
    pub request_id: Uuid,
    pub detailed: bool,
}

impl IntoResponse for Redacted {
    fn into_response(self) -> Response {
        let (status, kind) = self.error.status_and_kind();
        let body = ErrorBody {
            success: false,
            error: kind,
            code: status.as_u16(),
            timestamp: chrono::Utc::now(),
            request_id: self.request_id,
            detail: self.detailed.then(|| self.error.detail()),
        };
        (status, Json(body)).into_response()
    }
}

/// Fallback for code paths without a request id in scope (extractors,
/// middleware rejections before the request-id layer has run).
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        Redacted {
            request_id: Uuid::nil(),
            detailed: false,
            error: self,
        }
        .into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_taxonomy() {
        assert_eq!(
            AppError::BadRequest("x".into()).status_and_kind().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::NotFound.status_and_kind().0, StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::Forbidden("x".into()).status_and_kind().0,
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::UnsupportedPlatform("x".into()).status_and_kind().0,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Timeout.status_and_kind().0, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            AppError::UpstreamUnavailable.status_and_kind().0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::ExtractorProtocolError("x".into()).status_and_kind().0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::CacheUnavailable.status_and_kind().0,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn redacted_body_omits_detail_unless_enabled() {
        let redacted = Redacted {
            error: AppError::Internal("leaked path /etc/secret".into()),
            request_id: Uuid::nil(),
            detailed: false,
        };
        let resp = redacted.into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
