use std::time::Duration;

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use sessionctl_core::AdmissionRejectReason;

/// RFC-7807 `application/problem+json` body (§6, §7). `code` is the stable,
/// closed-set identifier client code is expected to match on; `type`/`title`
/// are the RFC-7807 boilerplate fields.
#[derive(Debug, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub problem_type: &'static str,
    pub title: &'static str,
    pub status: u16,
    pub code: &'static str,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

/// One error kind per §7's taxonomy, classified at the boundary where it
/// arises and never re-classified by a caller.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("malformed request: {0}")]
    Validation(String),

    #[error("missing or invalid bearer token")]
    Unauthenticated,

    #[error("token lacks required scope: {0}")]
    Unauthorized(&'static str),

    #[error("origin not allowed")]
    CsrfRejected,

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Duration },

    #[error("admission rejected: {reason}")]
    AdmissionRejected {
        reason: AdmissionRejectReason,
        retry_after: Option<Duration>,
    },

    #[error("session {0} not found")]
    NotFound(String),

    #[error("state store unavailable")]
    StoreUnavailable,

    #[error("internal error")]
    Internal(#[source] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let correlation_id = Some(uuid::Uuid::new_v4().to_string());
        match self {
            Self::Validation(detail) => problem_response(
                StatusCode::BAD_REQUEST,
                "validation_error",
                detail,
                correlation_id,
            ),
            Self::Unauthenticated => problem_response(
                StatusCode::UNAUTHORIZED,
                "unauthenticated",
                "a valid Authorization: Bearer token is required".into(),
                correlation_id,
            ),
            Self::Unauthorized(scope) => problem_response(
                StatusCode::FORBIDDEN,
                "unauthorized",
                format!("token lacks required scope {scope}"),
                correlation_id,
            ),
            Self::CsrfRejected => problem_response(
                StatusCode::FORBIDDEN,
                "csrf_rejected",
                "Origin or Referer did not match the configured allow-list".into(),
                correlation_id,
            ),
            Self::RateLimited { retry_after } => {
                let mut response = problem_response(
                    StatusCode::TOO_MANY_REQUESTS,
                    "rate_limited",
                    "too many requests from this caller".into(),
                    correlation_id,
                );
                if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                    response.headers_mut().insert("Retry-After", value);
                }
                response
            }
            Self::AdmissionRejected { reason, retry_after } => {
                let mut response = problem_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "admission_rejected",
                    format!("intent rejected: {reason}"),
                    correlation_id,
                );
                let headers = response.headers_mut();
                if let Ok(value) = HeaderValue::from_str(reason.as_str()) {
                    headers.insert("X-Admission-Factor", value);
                }
                let retry_secs = retry_after.unwrap_or(std::time::Duration::from_secs(5)).as_secs();
                if let Ok(value) = HeaderValue::from_str(&retry_secs.to_string()) {
                    headers.insert("Retry-After", value);
                }
                response
            }
            Self::NotFound(detail) => {
                problem_response(StatusCode::NOT_FOUND, "not_found", detail, correlation_id)
            }
            Self::StoreUnavailable => problem_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "the state store did not return a decisive answer in time".into(),
                correlation_id,
            ),
            Self::Internal(source) => {
                tracing::error!(error = %source, correlation_id = ?correlation_id, "internal error");
                problem_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "an internal error occurred; see logs for the correlation id".into(),
                    correlation_id,
                )
            }
        }
    }
}

impl From<sessionctl_store::StoreError> for ApiError {
    fn from(_: sessionctl_store::StoreError) -> Self {
        Self::StoreUnavailable
    }
}

impl From<sessionctl_store::LeaseError> for ApiError {
    fn from(_: sessionctl_store::LeaseError) -> Self {
        Self::StoreUnavailable
    }
}

fn problem_response(
    status: StatusCode,
    code: &'static str,
    detail: String,
    correlation_id: Option<String>,
) -> Response {
    let problem = Problem {
        problem_type: "about:blank",
        title: status.canonical_reason().unwrap_or("Error"),
        status: status.as_u16(),
        code,
        detail,
        correlation_id,
    };
    let mut response = (status, Json(problem)).into_response();
    response.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/problem+json"),
    );
    response
}
