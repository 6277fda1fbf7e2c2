use chrono::{DateTime, Utc};

/// Source of "now" for every pure decision function in the control plane.
///
/// Admission, lifecycle derivation, and lease-expiry checks all take `now`
/// as an explicit argument rather than calling `Utc::now()` directly, so
/// tests can drive them with fixed instants without relying on wall-clock
/// sleeps.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> DateTime<Utc>;
}

/// The real wall clock, used by the running process.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
