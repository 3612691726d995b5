//! Mentor turn configuration
//!
//! History window, retry budget, backoff curve, deadlines and the delta
//! fields the model may touch. [`MentorConfig::turn_settings`] turns this
//! into the values the turn handler consumes.

use serde::Deserialize;
use std::time::Duration;

use crate::application::TurnSettings;
use crate::domain::mentor::{
    OutputSchema, RetryPolicy, DEFAULT_PLAN_FIELDS, DEFAULT_PROJECTION_FIELDS,
};

use super::error::ValidationError;

/// Largest accepted chat history window.
const MAX_HISTORY_WINDOW: u32 = 200;

/// Mentor turn configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MentorConfig {
    /// Most recent chat messages included in the context bundle
    #[serde(default = "default_history_window")]
    pub history_window: u32,

    /// Model calls per turn, counting gateway and validation failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: u32,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Deadline for one gateway call, in seconds
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Deadline for the whole retry loop, in seconds
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,

    /// Fields a plan delta may set (comma separated in the environment)
    #[serde(default = "default_plan_fields")]
    pub plan_fields: Vec<String>,

    /// Fields a projection delta may set (comma separated in the environment)
    #[serde(default = "default_projection_fields")]
    pub projection_fields: Vec<String>,

    /// Reply length cap in characters
    pub max_reply_chars: Option<usize>,
}

impl MentorConfig {
    /// Retry policy for the validation-retry loop.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            backoff_multiplier: self.backoff_multiplier,
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
        }
    }

    /// Output schema permitting the configured delta fields.
    pub fn output_schema(&self) -> OutputSchema {
        let schema = OutputSchema::new(
            self.plan_fields.iter().map(|f| f.trim()),
            self.projection_fields.iter().map(|f| f.trim()),
        );
        match self.max_reply_chars {
            Some(max) => schema.with_max_reply_chars(max),
            None => schema,
        }
    }

    pub fn turn_settings(&self) -> TurnSettings {
        TurnSettings {
            history_window: self.history_window,
            policy: self.retry_policy(),
            schema: self.output_schema(),
        }
    }

    /// Validate mentor configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.history_window == 0 || self.history_window > MAX_HISTORY_WINDOW {
            return Err(ValidationError::InvalidHistoryWindow {
                max: MAX_HISTORY_WINDOW,
                actual: self.history_window,
            });
        }
        if self.call_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("mentor.call_timeout_secs"));
        }
        if self.turn_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("mentor.turn_timeout_secs"));
        }
        self.retry_policy()
            .validate()
            .map_err(|e| ValidationError::InvalidRetryPolicy(e.to_string()))?;

        check_fields("plan_fields", &self.plan_fields)?;
        check_fields("projection_fields", &self.projection_fields)?;

        if self.max_reply_chars == Some(0) {
            return Err(ValidationError::InvalidRetryPolicy(
                "max_reply_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_fields(list: &'static str, fields: &[String]) -> Result<(), ValidationError> {
    for field in fields {
        let name = field.trim();
        let well_formed = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !well_formed {
            return Err(ValidationError::InvalidDeltaField {
                list,
                entry: field.clone(),
            });
        }
    }
    Ok(())
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            history_window: default_history_window(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_ms: default_max_backoff(),
            call_timeout_secs: default_call_timeout(),
            turn_timeout_secs: default_turn_timeout(),
            plan_fields: default_plan_fields(),
            projection_fields: default_projection_fields(),
            max_reply_chars: None,
        }
    }
}

fn default_history_window() -> u32 {
    20
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff() -> u64 {
    200
}

fn default_backoff_multiplier() -> u32 {
    2
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_call_timeout() -> u64 {
    60
}

fn default_turn_timeout() -> u64 {
    180
}

fn default_plan_fields() -> Vec<String> {
    DEFAULT_PLAN_FIELDS.iter().map(|f| f.to_string()).collect()
}

fn default_projection_fields() -> Vec<String> {
    DEFAULT_PROJECTION_FIELDS.iter().map(|f| f.to_string()).collect()
}
