use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sessionctl_core::{
    IdempotencyEntry, IdempotencyKey, Lease, LeaseKey, OwnerId, PipelineId, PipelineRecord,
    SessionId, SessionRecord, TokenSubject,
};
use std::time::Duration;

use crate::error::StoreError;

/// Outcome of `acquire_lease`: either this caller now holds the lease, or it
/// is already held (unexpired) by someone else.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired(Lease),
    Conflict(Lease),
}

/// The durable key/value substrate (§4.1).
///
/// Implementations must provide linearizable per-key get/put/delete,
/// snapshot-scan semantics for `scan_sessions`/`scan_pipelines` (materialize
/// before invoking the caller's closure, so a slow closure cannot stall
/// concurrent writers), and the three atomic lease primitives.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn put_session(&self, record: SessionRecord) -> Result<(), StoreError>;
    async fn get_session(&self, id: SessionId) -> Result<Option<SessionRecord>, StoreError>;
    async fn delete_session(&self, id: SessionId) -> Result<(), StoreError>;

    /// Compare-and-swap on the record's `generation` tag. Returns `Ok(false)`
    /// (not an error) if the stored generation has moved past `expected`.
    async fn cas_session(
        &self,
        expected_generation: u64,
        record: SessionRecord,
    ) -> Result<bool, StoreError>;

    /// Snapshot-scan: materializes a `Vec` under the lock, then releases it
    /// before the caller inspects anything.
    async fn scan_sessions(&self) -> Result<Vec<SessionRecord>, StoreError>;

    async fn put_pipeline(&self, record: PipelineRecord) -> Result<(), StoreError>;
    async fn get_pipeline(&self, id: PipelineId) -> Result<Option<PipelineRecord>, StoreError>;
    async fn delete_pipeline(&self, id: PipelineId) -> Result<(), StoreError>;
    async fn scan_pipelines(&self) -> Result<Vec<PipelineRecord>, StoreError>;

    /// Atomic create-if-absent; returns the entry that now exists (either the
    /// one just inserted, or the pre-existing one for this key) (§3, P6).
    async fn put_idempotency_if_absent(
        &self,
        entry: IdempotencyEntry,
    ) -> Result<IdempotencyEntry, StoreError>;
    async fn get_idempotency(
        &self,
        subject: &TokenSubject,
        key: &IdempotencyKey,
    ) -> Result<Option<IdempotencyEntry>, StoreError>;
    /// Drop idempotency entries older than `ttl` as of `now`.
    async fn sweep_idempotency(&self, ttl: Duration, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Atomic; fails only if an unexpired lease exists with a different
    /// owner (§4.1).
    async fn acquire_lease(
        &self,
        key: LeaseKey,
        owner: OwnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, StoreError>;

    /// Fails if expired or owner mismatch (§4.1, L2).
    async fn renew_lease(
        &self,
        key: &LeaseKey,
        owner: &OwnerId,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Idempotent; silently succeeds if already absent (§4.1).
    async fn release_lease(&self, key: &LeaseKey, owner: &OwnerId) -> Result<(), StoreError>;

    async fn get_lease(&self, key: &LeaseKey) -> Result<Option<Lease>, StoreError>;
    async fn scan_leases(&self) -> Result<Vec<Lease>, StoreError>;
}
