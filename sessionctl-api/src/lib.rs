//! Authenticated HTTP intents surface for the sessionctl control plane.
//!
//! This crate owns the boundary between the outside world and the
//! admission/orchestration core: bearer-token auth, scope checks, CSRF
//! origin enforcement, CIDR-aware rate limiting, idempotency, and the
//! RFC-7807 error surface. Everything it touches underneath (store, bus,
//! orchestrator, capacity model) is built and owned by the binary crate and
//! handed in as [`state::AppState`].

pub mod auth;
pub mod config;
pub mod csrf;
pub mod dto;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod router;
pub mod state;

pub use auth::AuthContext;
pub use config::{ApiConfig, ApiToken};
pub use error::{ApiError, Problem};
pub use rate_limit::CallerRateLimiter;
pub use router::build_router;
pub use state::{AppState, Liveness};
