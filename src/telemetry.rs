//! Tracing subscriber setup.
//!
//! `MENTOR_LOG` overrides the configured filter when set to a valid
//! directive string.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Environment variable that overrides the configured log filter.
pub const LOG_ENV_VAR: &str = "MENTOR_LOG";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("failed to install tracing subscriber: {0}")]
    InstallFailed(String),
}

/// Installs the global `fmt` subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| TelemetryError::InstallFailed(e.to_string()))?;
    tracing::debug!(json = config.json, "tracing initialized");
    Ok(())
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| TelemetryError::InvalidFilter(format!("{}: {}", config.level, e)))
}
