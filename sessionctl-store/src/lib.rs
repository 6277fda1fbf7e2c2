//! Durable key/value state store, lease manager, and idempotency map
//! backing the sessionctl control plane (§4.1, §4.5).

mod error;
mod lease_manager;
mod memory;
mod persistence;
mod traits;

pub use error::{LeaseError, StoreError};
pub use lease_manager::LeaseManager;
pub use memory::InMemoryStore;
pub use traits::{AcquireOutcome, StateStore};

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use sessionctl_core::{
        ClientContext, IdempotencyEntry, IdempotencyKey, LeaseKey, OwnerId, PriorityClass,
        SessionRecord, TokenSubject,
    };

    use super::*;

    fn client() -> ClientContext {
        ClientContext {
            address: None,
            user_agent: None,
            token_subject: TokenSubject("alice".into()),
            request_id: "req-1".into(),
        }
    }

    #[tokio::test]
    async fn put_get_delete_session_round_trips() {
        let store = InMemoryStore::in_memory();
        let now = Utc::now();
        let record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
        let id = record.id;
        store.put_session(record).await.unwrap();
        assert!(store.get_session(id).await.unwrap().is_some());
        store.delete_session(id).await.unwrap();
        assert!(store.get_session(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_sessions_materializes_a_snapshot() {
        let store = InMemoryStore::in_memory();
        let now = Utc::now();
        for i in 0..5 {
            let record = SessionRecord::new(
                format!("svc-{i}"),
                PriorityClass::Live,
                client(),
                None,
                now,
            );
            store.put_session(record).await.unwrap();
        }
        assert_eq!(store.scan_sessions().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn cas_session_rejects_stale_generation() {
        let store = InMemoryStore::in_memory();
        let now = Utc::now();
        let mut record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
        store.put_session(record.clone()).await.unwrap();

        record.touch(); // generation now 1, but store still thinks current is 0
        let accepted = store.cas_session(0, record.clone()).await.unwrap();
        assert!(accepted);

        // Retry with the same stale expectation should now be rejected.
        record.touch();
        let rejected = store.cas_session(0, record).await.unwrap();
        assert!(!rejected);
    }

    #[tokio::test]
    async fn idempotency_create_if_absent_is_atomic() {
        let store = InMemoryStore::in_memory();
        let now = Utc::now();
        let subject = TokenSubject("alice".into());
        let key = IdempotencyKey("K".into());
        let first = IdempotencyEntry {
            subject: subject.clone(),
            key: key.clone(),
            session_id: sessionctl_core::SessionId::new(),
            created_at: now,
        };
        let second = IdempotencyEntry {
            subject: subject.clone(),
            key: key.clone(),
            session_id: sessionctl_core::SessionId::new(),
            created_at: now,
        };
        let returned_first = store.put_idempotency_if_absent(first.clone()).await.unwrap();
        let returned_second = store.put_idempotency_if_absent(second).await.unwrap();
        assert_eq!(returned_first.session_id, first.session_id);
        assert_eq!(returned_second.session_id, first.session_id);
    }

    #[tokio::test]
    async fn lease_round_trip_r1() {
        let store: std::sync::Arc<dyn StateStore> = std::sync::Arc::new(InMemoryStore::in_memory());
        let key = LeaseKey::for_session("s1");
        let owner_a = LeaseManager::new(store.clone(), OwnerId("a".into()));
        let owner_b = LeaseManager::new(store.clone(), OwnerId("b".into()));
        let now = Utc::now();

        let lease = owner_a.acquire(key.clone(), Duration::from_secs(30), now).await.unwrap();
        assert!(lease.is_some());
        // B cannot acquire while A's lease is live.
        assert!(owner_b
            .acquire(key.clone(), Duration::from_secs(30), now)
            .await
            .unwrap()
            .is_none());

        owner_a.release(&key).await.unwrap();
        // After release, B can acquire immediately — no overlap window.
        assert!(owner_b
            .acquire(key.clone(), Duration::from_secs(30), now)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn lease_steal_after_expiry_p2() {
        let store: std::sync::Arc<dyn StateStore> = std::sync::Arc::new(InMemoryStore::in_memory());
        let key = LeaseKey::for_session("s1");
        let owner_a = LeaseManager::new(store.clone(), OwnerId("a".into()));
        let owner_b = LeaseManager::new(store.clone(), OwnerId("b".into()));
        let t0 = Utc::now();

        owner_a
            .acquire(key.clone(), Duration::from_secs(10), t0)
            .await
            .unwrap()
            .unwrap();

        let still_live = t0 + chrono::Duration::seconds(5);
        assert!(owner_b
            .acquire(key.clone(), Duration::from_secs(10), still_live)
            .await
            .unwrap()
            .is_none());

        let after_ttl = t0 + chrono::Duration::seconds(11);
        assert!(owner_b
            .acquire(key.clone(), Duration::from_secs(10), after_ttl)
            .await
            .unwrap()
            .is_some());

        // A's renew attempt after being stolen must fail (fencing).
        assert!(!owner_a
            .renew(&key, Duration::from_secs(10), after_ttl)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn persistence_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let now = Utc::now();
        {
            let store = InMemoryStore::open(dir.path().to_path_buf()).unwrap();
            let record = SessionRecord::new("svc-1".into(), PriorityClass::Live, client(), None, now);
            store.put_session(record).await.unwrap();
            store.persist().unwrap();
        }
        let reopened = InMemoryStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(reopened.scan_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupted_snapshot_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sessions.json"), b"not json").unwrap();
        let result = InMemoryStore::open(dir.path().to_path_buf());
        assert!(matches!(result, Err(StoreError::Corrupt(_))));
    }
}
