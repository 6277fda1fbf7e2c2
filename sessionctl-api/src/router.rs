use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request, State};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::csrf::csrf_middleware;
use crate::handlers::{health, intents, metrics, sessions, system};
use crate::rate_limit::rate_limit_middleware;
use crate::state::AppState;

/// Records `xg2g_http_request_duration_seconds{method,path,status}` (§6).
/// Applied to every route, including the unauthenticated public ones, so the
/// histogram reflects the whole surface rather than just `/api/v3`.
async fn metrics_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let started = Instant::now();
    let response = next.run(req).await;
    let elapsed = started.elapsed().as_secs_f64();

    state
        .metrics
        .http_request_duration_seconds
        .with_label_values(&[method.as_str(), &path, response.status().as_str()])
        .observe(elapsed);

    response
}

/// Builds the full router (§4.7, §6): a public surface (`/healthz`,
/// `/readyz`, `/metrics`) and the versioned `/api/v3` surface guarded by
/// auth, CSRF, and rate-limit middleware, all wrapped in the security
/// headers and tracing layers the teacher's own HTTP examples apply process
/// wide (§9).
#[must_use]
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state);

    let public = Router::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/metrics", get(metrics::metrics));

    let api_v3 = Router::new()
        .route("/system/health", get(health::system_health))
        .route("/system/refresh", post(system::refresh))
        .route("/sessions/intents", post(intents::post_intents))
        .route("/sessions", get(sessions::list_sessions))
        .route("/sessions/:id", get(sessions::get_session))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), csrf_middleware))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let tls_terminated = state.config.tls_terminated;

    let router = public
        .nest("/api/v3", api_v3)
        .layer(middleware::from_fn_with_state(state.clone(), metrics_middleware))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(SetResponseHeaderLayer::if_not_present(
                    axum::http::header::X_CONTENT_TYPE_OPTIONS,
                    HeaderValue::from_static("nosniff"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    axum::http::header::X_FRAME_OPTIONS,
                    HeaderValue::from_static("DENY"),
                ))
                .layer(SetResponseHeaderLayer::if_not_present(
                    axum::http::header::REFERRER_POLICY,
                    HeaderValue::from_static("no-referrer"),
                )),
        );

    if tls_terminated {
        router.layer(SetResponseHeaderLayer::if_not_present(
            axum::http::header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=63072000; includeSubDomains"),
        ))
    } else {
        router
    }
}

fn cors_layer(state: &AppState) -> CorsLayer {
    let origins: Vec<HeaderValue> = state
        .config
        .allowed_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    let mut layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([axum::http::header::AUTHORIZATION, axum::http::header::CONTENT_TYPE]);

    layer = if origins.is_empty() {
        // A closed origin list with nothing configured keeps CORS closed
        // rather than silently falling back to permissive (§4.7: "closed
        // origin list").
        layer.allow_origin(AllowOrigin::list(Vec::<HeaderValue>::new()))
    } else {
        layer.allow_origin(AllowOrigin::list(origins))
    };

    if state.config.tls_terminated {
        layer = layer.max_age(Duration::from_secs(3600));
    }
    layer
}
