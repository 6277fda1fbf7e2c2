use std::collections::BTreeSet;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use sessionctl_core::{Scope, TokenSubject};

use crate::error::ApiError;
use crate::state::AppState;

/// Resolved caller identity, stashed as a request extension by
/// [`auth_middleware`] and pulled out by handlers via `Extension<AuthContext>`
/// (§4.7: bearer + scope-based authorization).
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject: TokenSubject,
    pub scopes: BTreeSet<Scope>,
}

impl AuthContext {
    pub fn require(&self, scope: Scope) -> Result<(), ApiError> {
        if self.scopes.contains(&scope) {
            Ok(())
        } else {
            Err(ApiError::Unauthorized(scope.as_str()))
        }
    }
}

/// Validates `Authorization: Bearer <token>` against the configured token
/// table; 401 on missing/unknown token. Scope enforcement happens per
/// handler via [`AuthContext::require`], since different endpoints under
/// the same router need different scopes (§4.7, §6).
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let presented = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated)?;

    let token = state.config.token_for(presented).ok_or(ApiError::Unauthenticated)?;
    req.extensions_mut().insert(AuthContext {
        subject: token.subject.clone(),
        scopes: token.scopes.clone(),
    });

    Ok(next.run(req).await)
}
