use axum::extract::{Request, State};
use axum::http::{header, Method};
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

/// Unsafe methods must carry an `Origin` (or, failing that, `Referer`)
/// matching the configured allow-list; a missing origin on an unsafe method
/// is itself a rejection, not a pass-through (§4.7 CSRF).
pub async fn csrf_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(*req.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(req).await);
    }

    let origin = req.headers().get(header::ORIGIN).and_then(|v| v.to_str().ok());
    let allowed = match origin {
        Some(value) => state.config.origin_allowed(value),
        None => req
            .headers()
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|referer| state.config.allowed_origins.iter().any(|o| referer.starts_with(o.as_str()))),
    };

    if !allowed {
        return Err(ApiError::CsrfRejected);
    }
    Ok(next.run(req).await)
}
