use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;

/// Overrides `[logging] level` when set.
pub const LOG_ENV: &str = "KNOCKRELAY_LOG";

/// Installs the global subscriber. Call once, from `main`.
pub fn init(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match cfg.format.as_str() {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt().with_env_filter(filter).with_target(true).init();
        }
    }
}
