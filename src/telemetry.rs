use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs the process-wide tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter. Call once at
/// startup; a second call returns an error instead of replacing the
/// subscriber.
pub fn init(config: &LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
}
