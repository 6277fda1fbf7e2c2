use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use sessionctl_core::{
    IdempotencyEntry, IdempotencyKey, Lease, LeaseKey, OwnerId, PipelineId, PipelineRecord,
    SessionId, SessionRecord, TokenSubject,
};
use tracing::instrument;

use crate::error::StoreError;
use crate::persistence::{self, Snapshot};
use crate::traits::{AcquireOutcome, StateStore};

/// In-process key/value store guarded by `parking_lot` locks, one per
/// keyspace, mirroring the `Arc<RwLock<HashMap<...>>>` shape a reflector
/// store uses for its local cache. Durability comes from periodic
/// snapshot-to-disk rather than a write-ahead log; see `persistence`.
pub struct InMemoryStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
    pipelines: RwLock<HashMap<PipelineId, PipelineRecord>>,
    idempotency: RwLock<HashMap<(TokenSubject, IdempotencyKey), IdempotencyEntry>>,
    leases: RwLock<HashMap<LeaseKey, Lease>>,
    data_dir: Option<PathBuf>,
}

impl InMemoryStore {
    /// Construct an empty, non-persistent store (used in tests and by the
    /// demo binary).
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            pipelines: RwLock::new(HashMap::new()),
            idempotency: RwLock::new(HashMap::new()),
            leases: RwLock::new(HashMap::new()),
            data_dir: None,
        }
    }

    /// Load from `data_dir` if snapshot files exist there, otherwise start
    /// empty. Fails closed: any snapshot file that exists but doesn't parse
    /// aborts construction with `StoreError::Corrupt` rather than silently
    /// dropping data (§4.1, §6: "must pass an integrity check at startup").
    #[instrument(skip_all, fields(data_dir = %data_dir.display()))]
    pub fn open(data_dir: PathBuf) -> Result<Self, StoreError> {
        std::fs::create_dir_all(&data_dir)
            .map_err(|e| StoreError::Unavailable(format!("cannot create data dir: {e}")))?;
        let snapshot = persistence::load(&data_dir)?;
        let idempotency = snapshot
            .idempotency
            .into_iter()
            .map(|entry| ((entry.subject.clone(), entry.key.clone()), entry))
            .collect();
        Ok(Self {
            sessions: RwLock::new(snapshot.sessions),
            pipelines: RwLock::new(snapshot.pipelines),
            idempotency: RwLock::new(idempotency),
            leases: RwLock::new(snapshot.leases),
            data_dir: Some(data_dir),
        })
    }

    /// Flush every keyspace to disk. A no-op for non-persistent stores.
    pub fn persist(&self) -> Result<(), StoreError> {
        let Some(dir) = &self.data_dir else {
            return Ok(());
        };
        let snapshot = Snapshot {
            sessions: self.sessions.read().clone(),
            pipelines: self.pipelines.read().clone(),
            idempotency: self.idempotency.read().values().cloned().collect(),
            leases: self.leases.read().clone(),
        };
        persistence::save(dir, &snapshot)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn put_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        self.sessions.write().insert(record.id, record);
        Ok(())
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self.sessions.read().get(&id).cloned())
    }

    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError> {
        self.sessions.write().remove(&id);
        Ok(())
    }

    async fn cas_session(
        &self,
        expected_generation: u64,
        record: SessionRecord,
    ) -> Result<bool, StoreError> {
        let mut guard = self.sessions.write();
        match guard.get(&record.id) {
            Some(current) if current.generation != expected_generation => Ok(false),
            _ => {
                guard.insert(record.id, record);
                Ok(true)
            }
        }
    }

    async fn scan_sessions(&self) -> Result<Vec<SessionRecord>, StoreError> {
        // Materialize the snapshot under the lock, then drop it: a slow
        // caller iterating the returned Vec can never stall a writer.
        let snapshot: Vec<SessionRecord> = self.sessions.read().values().cloned().collect();
        Ok(snapshot)
    }

    async fn put_pipeline(&self, record: PipelineRecord) -> Result<(), StoreError> {
        self.pipelines.write().insert(record.id, record);
        Ok(())
    }

    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<PipelineRecord>, StoreError> {
        Ok(self.pipelines.read().get(&id).cloned())
    }

    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), StoreError> {
        self.pipelines.write().remove(&id);
        Ok(())
    }

    async fn scan_pipelines(&self) -> Result<Vec<PipelineRecord>, StoreError> {
        Ok(self.pipelines.read().values().cloned().collect())
    }

    async fn put_idempotency_if_absent(
        &self,
        entry: IdempotencyEntry,
    ) -> Result<IdempotencyEntry, StoreError> {
        let mut guard = self.idempotency.write();
        let key = (entry.subject.clone(), entry.key.clone());
        Ok(guard.entry(key).or_insert(entry).clone())
    }

    async fn get_idempotency(
        &self,
        subject: &TokenSubject,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyEntry>, StoreError> {
        Ok(self
            .idempotency
            .read()
            .get(&(subject.clone(), key.clone()))
            .cloned())
    }

    async fn sweep_idempotency(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero());
        let mut guard = self.idempotency.write();
        let before = guard.len();
        guard.retain(|_, entry| now.signed_duration_since(entry.created_at) <= ttl);
        Ok(before - guard.len())
    }

    async fn acquire_lease(
        &self,
        key: LeaseKey,
        owner: OwnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut guard = self.leases.write();
        match guard.get(&key) {
            Some(existing) if existing.owner != owner && !existing.is_expired(now) => {
                Ok(AcquireOutcome::Conflict(existing.clone()))
            }
            Some(existing) => {
                let generation = existing.generation + 1;
                let lease = Lease {
                    key: key.clone(),
                    owner,
                    acquired_at: now,
                    ttl,
                    generation,
                };
                guard.insert(key, lease.clone());
                Ok(AcquireOutcome::Acquired(lease))
            }
            None => {
                let lease = Lease {
                    key: key.clone(),
                    owner,
                    acquired_at: now,
                    ttl,
                    generation: 0,
                };
                guard.insert(key, lease.clone());
                Ok(AcquireOutcome::Acquired(lease))
            }
        }
    }

    async fn renew_lease(
        &self,
        key: &LeaseKey,
        owner: &OwnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut guard = self.leases.write();
        let Some(existing) = guard.get(key) else {
            return Ok(false);
        };
        if &existing.owner != owner || existing.is_expired(now) {
            return Ok(false);
        }
        let mut renewed = existing.clone();
        renewed.acquired_at = now;
        renewed.ttl = ttl;
        guard.insert(key.clone(), renewed);
        Ok(true)
    }

    async fn release_lease(&self, key: &LeaseKey, owner: &OwnerId) -> Result<(), StoreError> {
        let mut guard = self.leases.write();
        if let Some(existing) = guard.get(key) {
            if &existing.owner == owner {
                guard.remove(key);
            }
            // Held by someone else: releasing a lease you don't hold is a
            // silent no-op, matching §4.1's idempotence requirement.
        }
        Ok(())
    }

    async fn get_lease(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError> {
        Ok(self.leases.read().get(key).cloned())
    }

    async fn scan_leases(&self) -> Result<Vec<Lease>, StoreError> {
        Ok(self.leases.read().values().cloned().collect())
    }
}
