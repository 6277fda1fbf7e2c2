use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::time::Duration;

use axum::extract::{connect_info::ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};

use crate::error::ApiError;
use crate::state::AppState;

/// Sliding-window limiter keyed by caller IP, with a CIDR-aware exemption
/// list consulted by the caller (§4.7 "Rate limiting ... CIDR-aware
/// allow-lists").
pub struct CallerRateLimiter {
    limiter: RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>,
    clock: DefaultClock,
}

impl CallerRateLimiter {
    #[must_use]
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute.max(1)).unwrap())
            .allow_burst(NonZeroU32::new(burst.max(1)).unwrap());
        Self {
            limiter: RateLimiter::keyed(quota),
            clock: DefaultClock::default(),
        }
    }

    fn check(&self, addr: IpAddr) -> Result<(), Duration> {
        self.limiter
            .check_key(&addr)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Consults the caller's IP (from `ConnectInfo`, populated by
/// `into_make_service_with_connect_info` in the bin crate) against the
/// exempt CIDR list and the per-caller limiter. Requests with no connect
/// info (only possible in tests run without a real listener) are let
/// through unlimited, since there is no caller identity to key on.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
        let ip = addr.ip();
        if !state.config.rate_limit_exempt(ip) {
            if let Err(retry_after) = state.rate_limiter.check(ip) {
                return Err(ApiError::RateLimited { retry_after });
            }
        }
    }
    Ok(next.run(req).await)
}
