//! B1-B3 boundary behaviors (§8).

mod support;

use axum::http::StatusCode;
use support::Harness;

#[tokio::test]
async fn b3_stopping_a_nonexistent_session_is_a_no_op_accepted() {
    let h = Harness::new(2, 2).await;

    let (status, _) = support::send(
        &h.router,
        support::post_intents(support::TOKEN_WRITER, support::stop_body(uuid::Uuid::new_v4())),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn b2_gpu_busy_rejection_never_creates_a_session_record() {
    let h = Harness::new(1, 1).await;

    let (status, _) = support::send(
        &h.router,
        support::post_intents(
            support::TOKEN_WRITER,
            serde_json::json!({"kind": "stream_start", "serviceRef": "p0", "priority": "pulse"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    wait_until_gpu_tokens_in_use(&h, std::time::Duration::from_secs(2), 1).await;

    let before = h.store.scan_sessions().await.unwrap().len();
    let (status, body) = support::send(
        &h.router,
        support::post_intents(
            support::TOKEN_WRITER,
            serde_json::json!({"kind": "stream_start", "serviceRef": "p1", "priority": "pulse"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body:?}");

    let after = h.store.scan_sessions().await.unwrap().len();
    assert_eq!(before, after, "a rejected pulse intent must not have created a session record");
}

#[tokio::test]
async fn b1_unauthenticated_requests_are_rejected_before_admission_runs() {
    let h = Harness::new(2, 2).await;

    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/v3/sessions/intents")
        .header("content-type", "application/json")
        .header("origin", "https://console.example.invalid")
        .body(axum::body::Body::from(
            serde_json::json!({"kind": "stream_start", "serviceRef": "x", "priority": "pulse"}).to_string(),
        ))
        .unwrap();

    let (status, _) = support::send(&h.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(h.store.scan_sessions().await.unwrap().is_empty());
}

async fn wait_until_gpu_tokens_in_use(h: &Harness, timeout: std::time::Duration, want: usize) {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let sessions = h.store.scan_sessions().await.unwrap();
        if sessions.iter().filter(|s| s.gpu_token.is_some()).count() == want {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("gpu tokens never reached {want} in use within {timeout:?}");
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
}
