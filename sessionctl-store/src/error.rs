use sessionctl_core::{LeaseKey, OwnerId};
use thiserror::Error;

/// Errors surfaced by the state store (§4.1).
///
/// `Unavailable` is the one variant every upstream caller must special-case:
/// the Intents API maps it to `503 service unavailable`, and the
/// orchestrator abandons the current reconciliation attempt rather than
/// retrying in a tight loop.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("compare-and-swap failed: record at {key} has moved on from the expected generation")]
    Conflict { key: String },

    #[error("persisted state failed its integrity check: {0}")]
    Corrupt(String),
}

impl StoreError {
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from the lease primitives (§3, §4.5).
#[derive(Debug, Error)]
pub enum LeaseError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("lease {key} is held by {holder} until {expires_at}")]
    HeldByOther {
        key: LeaseKey,
        holder: OwnerId,
        expires_at: chrono::DateTime<chrono::Utc>,
    },

    #[error("lease {key} is not held by {owner}")]
    NotOwner { key: LeaseKey, owner: OwnerId },
}
