//! Scenario 2 (§8): a recording intent preempts the oldest live session
//! when the tuner pool is full, and falls back to `pool_full` when there is
//! no live session left to preempt.

mod support;

use std::time::Duration;

use axum::http::StatusCode;
use support::Harness;

#[tokio::test]
async fn recording_preempts_oldest_live_session_when_tuners_are_full() {
    let h = Harness::new(4, 4).await;

    let mut live_ids = Vec::new();
    for i in 0..4 {
        let (status, body) = support::send(
            &h.router,
            support::post_intents(
                support::TOKEN_WRITER,
                serde_json::json!({"kind": "stream_start", "serviceRef": format!("live-{i}"), "priority": "live"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED, "{body:?}");
        live_ids.push(body.get("sessionId").and_then(|v| v.as_str()).unwrap().to_string());
        // Space the admissions out so the preemption ordering (oldest
        // `created_at` first) is unambiguous.
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    wait_until_tuner_slots_in_use(&h, Duration::from_secs(2), 4).await;

    // Pulse has its own pool; a pulse intent must not be able to touch the
    // tuner pool at all.
    let (status, body) = support::send(
        &h.router,
        support::post_intents(
            support::TOKEN_WRITER,
            serde_json::json!({"kind": "stream_start", "serviceRef": "pulse-a", "priority": "pulse"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body:?}");

    // A recording intent preempts the oldest live session.
    let (status, body) = support::send(
        &h.router,
        support::post_intents(
            support::TOKEN_WRITER,
            serde_json::json!({"kind": "stream_start", "serviceRef": "recording-a", "priority": "recording"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body:?}");

    let oldest_live = live_ids.first().unwrap();
    wait_until_terminal(&h, Duration::from_secs(2), oldest_live).await;

    assert!(h.metrics.preempt_total.get() >= 1);

    let sessions = h.store.scan_sessions().await.unwrap();
    let still_live = sessions
        .iter()
        .filter(|s| s.terminal.is_none() && s.priority == sessionctl_core::PriorityClass::Live)
        .count();
    assert_eq!(still_live, 3);

    // §8 scenario 2: the preempted session's detail read is a 410, not a
    // 200 describing its terminal state.
    let (status, _) = support::send(
        &h.router,
        support::get_with_token(&format!("/api/v3/sessions/{oldest_live}"), support::TOKEN_WRITER),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn recording_rejects_pool_full_when_no_live_session_exists_to_preempt() {
    let h = Harness::new(2, 2).await;

    for i in 0..2 {
        let (status, _) = support::send(
            &h.router,
            support::post_intents(
                support::TOKEN_WRITER,
                serde_json::json!({"kind": "stream_start", "serviceRef": format!("rec-{i}"), "priority": "recording"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    wait_until_tuner_slots_in_use(&h, Duration::from_secs(2), 2).await;

    let (status, body) = support::send(
        &h.router,
        support::post_intents(
            support::TOKEN_WRITER,
            serde_json::json!({"kind": "stream_start", "serviceRef": "rec-overflow", "priority": "recording"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{body:?}");
    assert_eq!(body.get("code").and_then(|v| v.as_str()), Some("admission_rejected"));
}

async fn wait_until_tuner_slots_in_use(h: &Harness, timeout: Duration, want: usize) {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let sessions = h.store.scan_sessions().await.unwrap();
        if sessions.iter().filter(|s| s.tuner_slot.is_some()).count() == want {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("tuner slots never reached {want} in use within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_until_terminal(h: &Harness, timeout: Duration, session_id: &str) {
    let id: uuid::Uuid = session_id.parse().unwrap();
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let sessions = h.store.scan_sessions().await.unwrap();
        if sessions.iter().any(|s| s.id.0 == id && s.terminal.is_some()) {
            return;
        }
        if std::time::Instant::now() >= deadline {
            panic!("session {session_id} never reached a terminal state within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
