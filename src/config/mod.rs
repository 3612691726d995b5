//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `MENTOR` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use mentor_core::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! let settings = config.mentor.turn_settings();
//! println!("History window: {}", settings.history_window);
//! ```

mod ai;
mod database;
mod error;
mod logging;
mod mentor;

pub use ai::AiConfig;
pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::LoggingConfig;
pub use mentor::MentorConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection pool
    pub database: DatabaseConfig,

    /// Model gateway (Anthropic Messages API)
    #[serde(default)]
    pub ai: AiConfig,

    /// Turn policy: history window, retries, deadlines, delta fields
    #[serde(default)]
    pub mentor: MentorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `MENTOR` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Splits `plan_fields` and `projection_fields` on commas
    ///
    /// # Environment Variable Format
    ///
    /// - `MENTOR__DATABASE__URL=...` -> `database.url = ...`
    /// - `MENTOR__MENTOR__MAX_ATTEMPTS=3` -> `mentor.max_attempts = 3`
    /// - `MENTOR__MENTOR__PLAN_FIELDS=items,focus` -> `mentor.plan_fields = ["items", "focus"]`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing or values
    /// cannot be parsed into the expected types.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("MENTOR")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("mentor.plan_fields")
                    .with_list_parse_key("mentor.projection_fields")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.database.validate()?;
        self.ai.validate()?;
        self.mentor.validate()?;
        self.logging.validate()?;
        if self.ai.timeout_secs >= self.mentor.call_timeout_secs {
            return Err(ValidationError::GatewayTimeoutNotBelowCallTimeout {
                ai: self.ai.timeout_secs,
                call: self.mentor.call_timeout_secs,
            });
        }
        Ok(())
    }
}
