//! Shared harness for the end-to-end scenarios (§8): wires the real store,
//! bus, capacity model, admission controller, and orchestrator behind the
//! actual `axum` router, with the mock pipeline standing in for the
//! out-of-scope encoder/remuxer (§1).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use sessionctl_api::{ApiConfig, ApiToken, AppState, CallerRateLimiter};
use sessionctl_core::{Scope, TokenSubject};
use sessionctl_pipeline::MockPipeline;
use sessionctl_runtime::{CapacityModel, EventBus, Metrics, Orchestrator, RuntimeConfig};
use sessionctl_store::{InMemoryStore, StateStore};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const TOKEN_ADMIN: &str = "test-admin-token";
pub const TOKEN_WRITER: &str = "test-writer-token";

pub struct Harness {
    pub router: Router,
    pub store: Arc<dyn StateStore>,
    pub pipeline: Arc<MockPipeline>,
    pub orchestrator: Arc<Orchestrator>,
    pub metrics: Arc<Metrics>,
    pub runtime_config: RuntimeConfig,
    pub shutdown: CancellationToken,
}

impl Harness {
    /// Spin up a harness with the given tuner slot count and GPU token
    /// total; every configured token carries every scope so individual
    /// tests don't need to juggle scoped tokens unless they're specifically
    /// testing authorization.
    pub async fn new(tuner_slots: u32, gpu_tokens_total: u32) -> Self {
        Self::with_config(tuner_slots, gpu_tokens_total, |_| {}).await
    }

    pub async fn with_config(
        tuner_slots: u32,
        gpu_tokens_total: u32,
        mutate: impl FnOnce(&mut RuntimeConfig),
    ) -> Self {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::in_memory());
        let metrics = Arc::new(Metrics::new().expect("metric registration"));
        let bus = Arc::new(EventBus::new(256, metrics.clone()));
        let pipeline = Arc::new(MockPipeline::new());
        let capacity = CapacityModel::new((0..tuner_slots).collect(), gpu_tokens_total);

        let mut runtime_config = RuntimeConfig::defaults((0..tuner_slots).collect(), gpu_tokens_total);
        runtime_config.lease_ttl = Duration::from_millis(200);
        runtime_config.heartbeat_every = Duration::from_millis(50);
        runtime_config.idle_timeout = Duration::from_millis(300);
        runtime_config.sweeper_interval = Duration::from_millis(50);
        runtime_config.stall_window = Duration::from_millis(75);
        runtime_config.session_retention = Duration::from_secs(3600);
        mutate(&mut runtime_config);

        let (orchestrator, due) = Orchestrator::new(
            store.clone(),
            bus.clone(),
            pipeline.clone(),
            capacity.clone(),
            runtime_config.clone(),
            metrics.clone(),
            "test-host",
        );

        let shutdown = CancellationToken::new();
        {
            let orchestrator = orchestrator.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { orchestrator.run(due, shutdown).await });
        }

        let mut tokens = BTreeMap::new();
        tokens.insert(
            TOKEN_ADMIN.to_string(),
            ApiToken {
                subject: TokenSubject("admin".into()),
                scopes: [Scope::Read, Scope::Write, Scope::Status, Scope::Admin].into_iter().collect(),
            },
        );
        tokens.insert(
            TOKEN_WRITER.to_string(),
            ApiToken {
                subject: TokenSubject("writer".into()),
                scopes: BTreeSet::from([Scope::Read, Scope::Write]),
            },
        );

        let api_config = Arc::new(ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            tokens,
            allowed_origins: BTreeSet::from(["https://console.example.invalid".to_string()]),
            rate_limit_exempt_cidrs: vec!["0.0.0.0/0".parse().unwrap(), "::/0".parse().unwrap()],
            rate_limit_per_minute: 10_000,
            rate_limit_burst: 10_000,
            idempotency_ttl: Duration::from_secs(300),
            outbound_policy: sessionctl_core::OutboundPolicy::default(),
            shutdown_budget: Duration::from_secs(5),
            tls_terminated: false,
        });

        let rate_limiter = Arc::new(CallerRateLimiter::new(
            api_config.rate_limit_per_minute,
            api_config.rate_limit_burst,
        ));

        let app_state = AppState::new(
            api_config,
            Arc::new(runtime_config.clone()),
            store.clone(),
            bus,
            orchestrator.clone(),
            Arc::new(capacity),
            metrics.clone(),
            rate_limiter,
        );
        app_state.mark_ready();
        app_state.liveness.touch();

        let router = sessionctl_api::build_router(app_state);

        Self {
            router,
            store,
            pipeline,
            orchestrator,
            metrics,
            runtime_config,
            shutdown,
        }
    }
}

/// Builds a `POST /api/v3/sessions/intents` request with the given bearer
/// token and JSON body.
pub fn post_intents(token: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v3/sessions/intents")
        .header("authorization", format!("Bearer {token}"))
        .header("content-type", "application/json")
        .header("origin", "https://console.example.invalid")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get_with_token(uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub fn stop_body(session_id: uuid::Uuid) -> serde_json::Value {
    serde_json::json!({ "kind": "stream_stop", "sessionId": session_id })
}

/// Polls `condition` on a short real-time interval until it returns `true`
/// or `timeout` elapses, for waiting on the background orchestrator to
/// reconcile a session (§9: concrete `#[tokio::test]` cases rather than a
/// property-testing crate; here the nondeterminism is background-task
/// scheduling, not time itself, so this polls wall clock instead of using
/// `tokio::time::pause`).
pub async fn wait_until<F>(timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = std::time::Instant::now() + timeout;
    loop {
        if condition() {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20).await.unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, value)
}
