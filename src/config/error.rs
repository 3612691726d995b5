//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid timeout: {0} must be positive")]
    InvalidTimeout(&'static str),

    #[error("ai.timeout_secs ({ai}) must be below mentor.call_timeout_secs ({call})")]
    GatewayTimeoutNotBelowCallTimeout { ai: u64, call: u64 },

    #[error("Invalid database URL format")]
    InvalidDatabaseUrl,

    #[error("Pool min_connections exceeds max_connections")]
    InvalidPoolSize,

    #[error("Pool size exceeds maximum allowed (100)")]
    PoolSizeTooLarge,

    #[error("Invalid model gateway base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("Temperature must be between 0.0 and 1.0, got {0}")]
    InvalidTemperature(f32),

    #[error("max_tokens must be positive")]
    InvalidMaxTokens,

    #[error("History window must be between 1 and {max}, got {actual}")]
    InvalidHistoryWindow { max: u32, actual: u32 },

    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid {list} entry: {entry:?}")]
    InvalidDeltaField { list: &'static str, entry: String },

    #[error("Invalid log filter: {0}")]
    InvalidLogLevel(String),
}
