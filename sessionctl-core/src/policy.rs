use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Static, configured allow-list consulted before any part of the system
/// opens an outbound connection or admits an intent whose implied target is
/// disallowed (§3, admission rule 1).
///
/// `hosts`/`ports`/`schemes` are plain string/int matches; CIDR matching for
/// the rate limiter and the outbound policy's address checks is done by
/// `sessionctl-api` (which depends on `ipnet`) — this type only carries the
/// configured shape, so `sessionctl-core` stays free of a network-parsing
/// dependency it doesn't otherwise need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutboundPolicy {
    pub allowed_hosts: BTreeSet<String>,
    pub allowed_cidrs: BTreeSet<String>,
    pub allowed_ports: BTreeSet<u16>,
    pub allowed_schemes: BTreeSet<String>,
}

impl OutboundPolicy {
    /// Whether `host` is present in the explicit allow-list.
    ///
    /// CIDR membership is checked by the caller, which has access to a
    /// parsed IP and the `ipnet` crate; this only does literal host matches.
    #[must_use]
    pub fn allows_host(&self, host: &str) -> bool {
        self.allowed_hosts.contains(host)
    }

    #[must_use]
    pub fn allows_scheme(&self, scheme: &str) -> bool {
        self.allowed_schemes.is_empty() || self.allowed_schemes.contains(scheme)
    }

    #[must_use]
    pub fn allows_port(&self, port: u16) -> bool {
        self.allowed_ports.is_empty() || self.allowed_ports.contains(&port)
    }
}

/// Bearer-token authorization scopes (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scope {
    #[serde(rename = "v3:read")]
    Read,
    #[serde(rename = "v3:write")]
    Write,
    #[serde(rename = "v3:status")]
    Status,
    #[serde(rename = "v3:admin")]
    Admin,
}

impl Scope {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Read => "v3:read",
            Self::Write => "v3:write",
            Self::Status => "v3:status",
            Self::Admin => "v3:admin",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
