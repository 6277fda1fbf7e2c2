//! Layered configuration: process environment > configuration file >
//! compiled defaults (§6 `[AMBIENT]`), built with the `config` crate the
//! same way the streaming-proxy control plane this API most resembles
//! layers its own settings.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use config::{Config, Environment, File};
use ipnet::IpNet;
use serde::Deserialize;
use sessionctl_api::{ApiConfig, ApiToken};
use sessionctl_core::{OutboundPolicy, Scope, TokenSubject};
use sessionctl_runtime::RuntimeConfig;

#[derive(Debug, Parser)]
#[command(name = "sessionctl", about = "Session control plane for live/TV streaming")]
pub struct CliArgs {
    /// Optional TOML configuration file; environment variables still take
    /// precedence over anything it sets.
    #[arg(long, env = "SESSIONCTL_CONFIG_FILE")]
    pub config_file: Option<PathBuf>,

    /// Emit logs as newline-delimited JSON instead of the default
    /// human-readable format.
    #[arg(long, env = "SESSIONCTL_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    subject: String,
    scopes: BTreeSet<Scope>,
}

#[derive(Debug, Deserialize)]
struct RawSettings {
    bind_addr: String,
    data_dir: String,
    tuner_slots: Vec<u32>,
    gpu_tokens_total: u32,
    lease_ttl_secs: u64,
    heartbeat_every_secs: u64,
    pipeline_stop_timeout_secs: u64,
    start_concurrency: usize,
    stop_concurrency: usize,
    idle_timeout_secs: u64,
    sweeper_interval_secs: u64,
    session_retention_secs: u64,
    stall_window_secs: u64,
    allowed_origins: Vec<String>,
    rate_limit_exempt_cidrs: Vec<String>,
    rate_limit_per_minute: u32,
    rate_limit_burst: u32,
    idempotency_ttl_secs: u64,
    shutdown_budget_secs: u64,
    tls_terminated: bool,
    tokens: Vec<RawToken>,
    outbound_allowed_hosts: Vec<String>,
    outbound_allowed_cidrs: Vec<String>,
    outbound_allowed_ports: Vec<u16>,
    outbound_allowed_schemes: Vec<String>,
}

/// The fully loaded, validated configuration the bin crate wires up.
pub struct Settings {
    pub data_dir: PathBuf,
    pub runtime: RuntimeConfig,
    pub api: ApiConfig,
}

/// Builds the three-tier `config` source stack and deserializes + validates
/// it. Defaults live here, as plain `set_default` calls, rather than in a
/// baked-in TOML asset, so the precedence chain has exactly one place each
/// key is spelled.
pub fn load(cli: &CliArgs) -> anyhow::Result<Settings> {
    let mut builder = Config::builder()
        .set_default("bind_addr", "0.0.0.0:8443")?
        .set_default("data_dir", "./data")?
        .set_default("tuner_slots", vec![0_i64, 1, 2, 3])?
        .set_default("gpu_tokens_total", 2)?
        .set_default("lease_ttl_secs", 30)?
        .set_default("heartbeat_every_secs", 10)?
        .set_default("pipeline_stop_timeout_secs", 10)?
        .set_default("start_concurrency", 8)?
        .set_default("stop_concurrency", 8)?
        .set_default("idle_timeout_secs", 300)?
        .set_default("sweeper_interval_secs", 60)?
        .set_default("session_retention_secs", 86_400)?
        .set_default("stall_window_secs", 75)?
        .set_default("allowed_origins", Vec::<String>::new())?
        .set_default("rate_limit_exempt_cidrs", Vec::<String>::new())?
        .set_default("rate_limit_per_minute", 120)?
        .set_default("rate_limit_burst", 30)?
        .set_default("idempotency_ttl_secs", 300)?
        .set_default("shutdown_budget_secs", 20)?
        .set_default("tls_terminated", false)?
        .set_default("tokens", Vec::<String>::new())?
        .set_default("outbound_allowed_hosts", Vec::<String>::new())?
        .set_default("outbound_allowed_cidrs", Vec::<String>::new())?
        .set_default("outbound_allowed_ports", Vec::<i64>::new())?
        .set_default("outbound_allowed_schemes", Vec::<String>::new())?;

    if let Some(path) = &cli.config_file {
        builder = builder.add_source(File::from(path.clone()).required(false));
    } else {
        builder = builder.add_source(File::with_name("sessionctl").required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SESSIONCTL")
            .separator("__")
            .try_parsing(true)
            .list_separator(","),
    );

    let raw: RawSettings = builder
        .build()
        .context("assembling layered configuration")?
        .try_deserialize()
        .context("deserializing configuration into RawSettings")?;

    let data_dir = PathBuf::from(&raw.data_dir);

    let runtime = RuntimeConfig {
        tuner_slots: raw.tuner_slots,
        gpu_tokens_total: raw.gpu_tokens_total,
        priority_classes: BTreeMap::new(),
        lease_ttl: Duration::from_secs(raw.lease_ttl_secs),
        heartbeat_every: Duration::from_secs(raw.heartbeat_every_secs),
        pipeline_stop_timeout: Duration::from_secs(raw.pipeline_stop_timeout_secs),
        start_concurrency: raw.start_concurrency,
        stop_concurrency: raw.stop_concurrency,
        idle_timeout: Duration::from_secs(raw.idle_timeout_secs),
        sweeper_interval: Duration::from_secs(raw.sweeper_interval_secs),
        session_retention: Duration::from_secs(raw.session_retention_secs),
        stall_window: Duration::from_secs(raw.stall_window_secs),
    };
    runtime.validate().context("validating runtime configuration")?;

    let bind_addr: SocketAddr = raw.bind_addr.parse().context("parsing bind_addr")?;

    let rate_limit_exempt_cidrs = raw
        .rate_limit_exempt_cidrs
        .iter()
        .map(|cidr| cidr.parse::<IpNet>().with_context(|| format!("parsing rate_limit_exempt_cidrs entry {cidr}")))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let tokens = raw
        .tokens
        .into_iter()
        .map(|raw_token| {
            (
                raw_token.subject.clone(),
                ApiToken {
                    subject: TokenSubject(raw_token.subject),
                    scopes: raw_token.scopes,
                },
            )
        })
        .collect::<BTreeMap<_, _>>();

    let outbound_policy = OutboundPolicy {
        allowed_hosts: raw.outbound_allowed_hosts.into_iter().collect(),
        allowed_cidrs: raw.outbound_allowed_cidrs.into_iter().collect(),
        allowed_ports: raw.outbound_allowed_ports.into_iter().collect(),
        allowed_schemes: raw.outbound_allowed_schemes.into_iter().collect(),
    };

    let api = ApiConfig {
        bind_addr,
        tokens,
        allowed_origins: raw.allowed_origins.into_iter().collect(),
        rate_limit_exempt_cidrs,
        rate_limit_per_minute: raw.rate_limit_per_minute,
        rate_limit_burst: raw.rate_limit_burst,
        idempotency_ttl: Duration::from_secs(raw.idempotency_ttl_secs),
        outbound_policy,
        shutdown_budget: Duration::from_secs(raw.shutdown_budget_secs),
        tls_terminated: raw.tls_terminated,
    };

    Ok(Settings { data_dir, runtime, api })
}
