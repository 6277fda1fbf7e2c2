//! Event bus, capacity model, admission controller, orchestrator, and
//! sweeper: the policy and reconciliation layer sitting between the state
//! store and the intents API (§4).

mod admission;
mod bus;
mod capacity;
mod config;
mod error;
mod lifecycle;
mod metrics;
mod orchestrator;
mod scheduler;
mod sweeper;

pub use admission::{decide, Decision, Intent, OutboundTarget};
pub use bus::{BusEvent, BusMessage, BusSubscription, EventBus};
pub use capacity::CapacityModel;
pub use config::{ConfigError, RuntimeConfig};
pub use error::RuntimeError;
pub use metrics::Metrics;
pub use orchestrator::Orchestrator;
pub use sweeper::{SweepReport, Sweeper};
