use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::OwnerId;

/// Key a lease is held under, e.g. `session:<id>` or `service:<ref>` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseKey(pub String);

impl LeaseKey {
    #[must_use]
    pub fn for_session(id: impl fmt::Display) -> Self {
        Self(format!("session:{id}"))
    }

    #[must_use]
    pub fn for_service(service_ref: &str) -> Self {
        Self(format!("service:{service_ref}"))
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An exclusive, time-bounded claim on a lease key (§3, §4.5).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub key: LeaseKey,
    pub owner: OwnerId,
    pub acquired_at: DateTime<Utc>,
    pub ttl: Duration,
    /// Strictly increases across acquire/steal; used to fence stale renewals.
    pub generation: u64,
}

impl Lease {
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.acquired_at
            + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero())
    }

    /// A lease whose `acquired_at + ttl` is in the past is expired and may
    /// be stolen by any caller (§3).
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() <= now
    }
}
