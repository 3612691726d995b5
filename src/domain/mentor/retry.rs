//! Retry policy and state vocabulary for the validation-retry loop.
//!
//! ```text
//! Drafting --gateway ok / malformed--> Validating --valid--> Succeeded
//!    ^   \--transient gateway error, attempts left--/|
//!    |                                               |
//!    +------------- invalid, attempts left ----------+
//! Drafting/Validating --attempts used up--> Exhausted
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::foundation::ValidationError;

use super::output::{OutputValidationError, PLAN_DELTA_FIELD, PROJECTION_DELTA_FIELD, REPLY_FIELD};

/// Upper bound accepted for the attempt budget.
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// States of the validation-retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Drafting,
    Validating,
    Succeeded,
    Exhausted,
}

impl LoopState {
    /// Returns true for `Succeeded` and `Exhausted`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopState::Succeeded | LoopState::Exhausted)
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopState::Drafting => "drafting",
            LoopState::Validating => "validating",
            LoopState::Succeeded => "succeeded",
            LoopState::Exhausted => "exhausted",
        };
        write!(f, "{}", s)
    }
}

/// Bounds on one turn's model calls.
///
/// `max_attempts` counts gateway failures and validation failures
/// together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    pub max_backoff: Duration,
    /// Deadline for a single gateway call.
    pub call_timeout: Duration,
    /// Wall-clock deadline for the whole loop.
    pub turn_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            backoff_multiplier: 2,
            max_backoff: Duration::from_secs(5),
            call_timeout: Duration::from_secs(60),
            turn_timeout: Duration::from_secs(180),
        }
    }
}

impl RetryPolicy {
    /// Creates the default policy with a custom attempt budget.
    pub fn with_max_attempts(max_attempts: u32) -> Result<Self, ValidationError> {
        let policy = Self {
            max_attempts,
            ..Self::default()
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Removes all backoff delays.
    pub fn without_backoff(mut self) -> Self {
        self.initial_backoff = Duration::ZERO;
        self.max_backoff = Duration::ZERO;
        self
    }

    /// Checks the policy is finite and usable.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ValidationError::out_of_range(
                "max_attempts",
                1,
                MAX_ATTEMPTS_LIMIT as i64,
                self.max_attempts as i64,
            ));
        }
        if self.backoff_multiplier == 0 {
            return Err(ValidationError::out_of_range(
                "backoff_multiplier",
                1,
                i64::from(u32::MAX),
                0,
            ));
        }
        if self.call_timeout.is_zero() {
            return Err(ValidationError::invalid_format("call_timeout", "must be positive"));
        }
        if self.turn_timeout < self.call_timeout {
            return Err(ValidationError::invalid_format(
                "turn_timeout",
                "must be at least call_timeout",
            ));
        }
        Ok(())
    }

    /// Delay before the next attempt after `failures` consecutive gateway failures.
    ///
    /// Grows geometrically from `initial_backoff` and never exceeds
    /// `max_backoff`. A provider hint (e.g. `retry-after`) replaces the
    /// computed delay but is capped the same way.
    pub fn backoff_for(&self, failures: u32, hint: Option<Duration>) -> Duration {
        if let Some(hint) = hint {
            return hint.min(self.max_backoff);
        }
        let exponent = failures.saturating_sub(1);
        let factor = self.backoff_multiplier.saturating_pow(exponent);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Feedback sent to the model describing why its previous output was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct CorrectiveInstruction(String);

impl CorrectiveInstruction {
    /// Builds an instruction naming every violated field and the reason.
    pub fn from_violations(error: &OutputValidationError) -> Self {
        let mut text = String::from(
            "Your previous response was rejected because it did not match the required output format:\n",
        );
        for violation in error.violations() {
            text.push_str("- ");
            text.push_str(&violation.to_string());
            text.push('\n');
        }
        text.push_str(&format!(
            "Respond with exactly one JSON object containing a non-empty `{}` string and, \
             only if something changed, `{}` and `{}` objects using the permitted fields.",
            REPLY_FIELD, PLAN_DELTA_FIELD, PROJECTION_DELTA_FIELD
        ));
        Self(text)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrectiveInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
