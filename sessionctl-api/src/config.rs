use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::time::Duration;

use ipnet::IpNet;
use sessionctl_core::{OutboundPolicy, Scope, TokenSubject};

/// One configured bearer token: the subject it resolves to and the scopes it
/// carries (§4.7, §6 "API token(s) with scope sets").
#[derive(Debug, Clone)]
pub struct ApiToken {
    pub subject: TokenSubject,
    pub scopes: BTreeSet<Scope>,
}

/// Everything the intents API needs that isn't already owned by
/// `sessionctl-runtime::RuntimeConfig` — bind address, auth, CSRF, and rate
/// limiting (§6 "Security" config group).
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_addr: SocketAddr,
    pub tokens: BTreeMap<String, ApiToken>,
    /// `Origin`/`Referer` values accepted for unsafe methods and for CORS.
    pub allowed_origins: BTreeSet<String>,
    /// Caller CIDRs exempt from rate limiting (e.g. internal health probes).
    pub rate_limit_exempt_cidrs: Vec<IpNet>,
    pub rate_limit_per_minute: u32,
    pub rate_limit_burst: u32,
    pub idempotency_ttl: Duration,
    /// Rule 1 of admission (§4.4): the outbound allow-list `decide` checks a
    /// resolved intent target against. Target resolution itself (service
    /// reference → host/port/scheme) is an external collaborator this crate
    /// doesn't implement, so `implied_target` stays `None` until one exists
    /// — but the configured policy itself must still reach `decide` rather
    /// than a permissive default, so it's ready the day resolution lands.
    pub outbound_policy: OutboundPolicy,
    /// §5: HTTP component's shutdown drain budget.
    pub shutdown_budget: Duration,
    /// §6: HSTS header is only sent when the deployment terminates TLS
    /// (directly, or via a trusted reverse proxy the operator has vetted).
    pub tls_terminated: bool,
}

impl ApiConfig {
    #[must_use]
    pub fn token_for(&self, presented: &str) -> Option<&ApiToken> {
        self.tokens.get(presented)
    }

    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.allowed_origins.contains(origin)
    }

    #[must_use]
    pub fn rate_limit_exempt(&self, addr: std::net::IpAddr) -> bool {
        self.rate_limit_exempt_cidrs.iter().any(|net| net.contains(&addr))
    }
}
