use std::time::Duration;

use sessionctl_core::PriorityClass;
use std::collections::BTreeMap;

/// Runtime-tunable knobs, loaded by the `sessionctl` binary via layered
/// configuration (process env > file > compiled defaults, §6) and passed by
/// value into the capacity model, admission controller, orchestrator, and
/// sweeper at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub tuner_slots: Vec<u32>,
    pub gpu_tokens_total: u32,
    pub priority_classes: BTreeMap<PriorityClass, ()>,

    pub lease_ttl: Duration,
    pub heartbeat_every: Duration,
    pub pipeline_stop_timeout: Duration,
    pub start_concurrency: usize,
    pub stop_concurrency: usize,
    pub idle_timeout: Duration,
    pub sweeper_interval: Duration,
    pub session_retention: Duration,
    /// Policy, not a recorded fact (§9 open question): how long without
    /// progress before a non-terminal session is considered `stalled`.
    pub stall_window: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("stall_window must be > 0 and <= idle_timeout (got stall_window={stall_window:?}, idle_timeout={idle_timeout:?})")]
    InvalidStallWindow {
        stall_window: Duration,
        idle_timeout: Duration,
    },
    #[error("heartbeat_every must be strictly less than lease_ttl / 2 (got heartbeat_every={heartbeat_every:?}, lease_ttl={lease_ttl:?})")]
    InvalidHeartbeatCadence {
        heartbeat_every: Duration,
        lease_ttl: Duration,
    },
}

impl RuntimeConfig {
    #[must_use]
    pub fn defaults(tuner_slots: Vec<u32>, gpu_tokens_total: u32) -> Self {
        let idle_timeout = Duration::from_secs(300);
        Self {
            tuner_slots,
            gpu_tokens_total,
            priority_classes: BTreeMap::new(),
            lease_ttl: Duration::from_secs(30),
            heartbeat_every: Duration::from_secs(10),
            pipeline_stop_timeout: Duration::from_secs(10),
            start_concurrency: 8,
            stop_concurrency: 8,
            idle_timeout,
            sweeper_interval: Duration::from_secs(60),
            session_retention: Duration::from_secs(24 * 3600),
            stall_window: idle_timeout / 4,
        }
    }

    /// Validated at startup; an invalid configuration aborts the process
    /// rather than running with undefined stall/heartbeat behavior.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stall_window.is_zero() || self.stall_window > self.idle_timeout {
            return Err(ConfigError::InvalidStallWindow {
                stall_window: self.stall_window,
                idle_timeout: self.idle_timeout,
            });
        }
        if self.heartbeat_every * 2 >= self.lease_ttl {
            return Err(ConfigError::InvalidHeartbeatCadence {
                heartbeat_every: self.heartbeat_every,
                lease_ttl: self.lease_ttl,
            });
        }
        Ok(())
    }
}
