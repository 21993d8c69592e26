use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Fallback log-level variable when `RUST_LOG` is unset.
pub const LOG_ENV: &str = "NMAP_OLLAMA_DASHBOARD_LOGLEVEL";

const DEFAULT_FILTER: &str = "nmap_ollama_dashboard=info,tower_http=info";

/// Filter directives: `RUST_LOG`, then [`LOG_ENV`], then the crate default.
pub fn filter_directives() -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV))
        .unwrap_or_else(|_| DEFAULT_FILTER.to_string())
}

/// Install the global stderr subscriber.
pub fn initialize_logging() -> Result<()> {
    let filter = EnvFilter::try_new(filter_directives())
        .map_err(|e| anyhow!("invalid log filter: {e}"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| anyhow!("failed to install tracing subscriber: {e}"))?;
    Ok(())
}
