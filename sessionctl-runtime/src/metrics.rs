use prometheus::{HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};

/// Process-wide metric handles, constructed once at startup and injected
/// into every component that records one (§6, §9 — "never a global/static
/// registry reached for by name").
pub struct Metrics {
    pub registry: Registry,
    pub admission_reject_total: IntCounterVec,
    pub gpu_tokens_in_use: IntGauge,
    pub tuners_in_use: IntGauge,
    pub active_sessions: IntGaugeVec,
    pub preempt_total: IntCounter,
    pub invariant_violation_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,
    pub sweep_duration_seconds: prometheus::Histogram,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let admission_reject_total = IntCounterVec::new(
            Opts::new(
                "xg2g_admission_reject_total",
                "Admission decisions that rejected an intent, by reason",
            ),
            &["reason"],
        )?;
        let gpu_tokens_in_use = IntGauge::new(
            "xg2g_gpu_tokens_in_use",
            "GPU transcode tokens currently reserved",
        )?;
        let tuners_in_use = IntGauge::new("xg2g_tuners_in_use", "Tuner slots currently reserved")?;
        let active_sessions = IntGaugeVec::new(
            Opts::new(
                "xg2g_active_sessions",
                "Non-terminal sessions currently tracked, by priority class",
            ),
            &["priority"],
        )?;
        let preempt_total = IntCounter::new(
            "xg2g_preempt_total",
            "Sessions forcibly terminated to admit a higher-priority intent",
        )?;
        let invariant_violation_total = IntCounterVec::new(
            Opts::new(
                "xg2g_invariant_violation_total",
                "Detected violations of an internal invariant, by rule",
            ),
            &["rule"],
        )?;
        let http_request_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "xg2g_http_request_duration_seconds",
                "Intents API request latency",
            ),
            &["method", "path", "status"],
        )?;
        let sweep_duration_seconds = prometheus::Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "xg2g_sweep_duration_seconds",
                "Wall-clock duration of one sweeper pass",
            ),
        )?;

        registry.register(Box::new(admission_reject_total.clone()))?;
        registry.register(Box::new(gpu_tokens_in_use.clone()))?;
        registry.register(Box::new(tuners_in_use.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(preempt_total.clone()))?;
        registry.register(Box::new(invariant_violation_total.clone()))?;
        registry.register(Box::new(http_request_duration_seconds.clone()))?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            admission_reject_total,
            gpu_tokens_in_use,
            tuners_in_use,
            active_sessions,
            preempt_total,
            invariant_violation_total,
            http_request_duration_seconds,
            sweep_duration_seconds,
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("metric registration with hardcoded, non-conflicting names")
    }
}
