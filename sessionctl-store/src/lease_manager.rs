use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sessionctl_core::{Lease, LeaseKey, OwnerId};
use tracing::instrument;

use crate::error::LeaseError;
use crate::traits::{AcquireOutcome, StateStore};

/// Thin wrapper over the store's atomic lease primitives (§4.5).
///
/// This is deliberately *not* where lease semantics are decided — the store
/// implementation owns the atomicity. `LeaseManager` exists so the rest of
/// the codebase (orchestrator, service-ref admission lock) depends on a
/// narrow, owner-typed surface instead of the general `StateStore` trait.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn StateStore>,
    owner: OwnerId,
}

impl LeaseManager {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, owner: OwnerId) -> Self {
        Self { store, owner }
    }

    #[must_use]
    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    /// Returns `Ok(Some(lease))` if acquired, `Ok(None)` if some other owner
    /// currently holds an unexpired lease for `key`.
    #[instrument(skip(self))]
    pub async fn acquire(
        &self,
        key: LeaseKey,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<Lease>, LeaseError> {
        match self
            .store
            .acquire_lease(key, self.owner.clone(), ttl, now)
            .await?
        {
            AcquireOutcome::Acquired(lease) => Ok(Some(lease)),
            AcquireOutcome::Conflict(_) => Ok(None),
        }
    }

    /// A successful renew strictly extends the expiry deadline (L2).
    #[instrument(skip(self))]
    pub async fn renew(
        &self,
        key: &LeaseKey,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, LeaseError> {
        Ok(self.store.renew_lease(key, &self.owner, ttl, now).await?)
    }

    #[instrument(skip(self))]
    pub async fn release(&self, key: &LeaseKey) -> Result<(), LeaseError> {
        Ok(self.store.release_lease(key, &self.owner).await?)
    }

    pub async fn get(&self, key: &LeaseKey) -> Result<Option<Lease>, LeaseError> {
        Ok(self.store.get_lease(key).await?)
    }
}
