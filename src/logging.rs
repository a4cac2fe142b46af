//! Tracing subscriber setup.
//!
//! Log lines go to stderr; stdout is reserved for command output.
//! `RUST_LOG` overrides `[logging].level`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{HarvestError, Result};

/// Install the global subscriber. Call once, before any tracing macro fires.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(env_filter);
    let fmt = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let result = match config.format.as_str() {
        "json" => registry.with(fmt.json()).try_init(),
        "compact" => registry.with(fmt.compact()).try_init(),
        "pretty" => registry.with(fmt.pretty()).try_init(),
        other => {
            return Err(HarvestError::Config(format!(
                "unknown logging.format '{}', expected pretty, json or compact",
                other
            )))
        }
    };

    result.map_err(|e| HarvestError::Config(format!("failed to initialize tracing: {}", e)))
}
