//! Structured logging setup

use crate::config::LogFormat;
use crate::error::{Result, VigilError};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global `tracing` subscriber
///
/// `RUST_LOG` wins over `level` when set. Fails if `level` is not a valid
/// filter directive or a subscriber is already installed.
pub fn init(level: &str, format: LogFormat) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| VigilError::Config(format!("invalid log level '{level}': {e}")))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    installed.map_err(|e| VigilError::Config(format!("failed to install log subscriber: {e}")))
}
