//! Tracing-subscriber bootstrap (§6 `[AMBIENT]`, §9). `RUST_LOG` drives the
//! filter, same convention the rest of the corpus uses; `--log-json` swaps
//! the human-readable formatter for a structured one on long-running
//! deployments that ship logs to an aggregator.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

pub fn init(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_json {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true));
        subscriber.init();
    } else {
        let subscriber = Registry::default()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true));
        subscriber.init();
    }
}
