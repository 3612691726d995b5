//! Errors surfaced by a mentoring turn.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, UserId, ValidationError};
use crate::domain::mentor::OutputValidationError;
use crate::ports::{GatewayErrorKind, PersistenceError};

/// Text shown to users for every terminal failure that is not their fault.
pub const UNAVAILABLE_MESSAGE: &str = "The mentor is temporarily unavailable. Please try again.";

/// Entity whose absence stops a turn before the model is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingEntity {
    User,
    Assessment,
}

impl fmt::Display for MissingEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingEntity::User => write!(f, "user"),
            MissingEntity::Assessment => write!(f, "assessment"),
        }
    }
}

/// Which deadline was exceeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutStage {
    /// A single model gateway call.
    GatewayCall,
    /// The whole validation-retry loop.
    Turn,
}

impl fmt::Display for TimeoutStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutStage::GatewayCall => write!(f, "model gateway call"),
            TimeoutStage::Turn => write!(f, "mentor turn"),
        }
    }
}

/// What the loop last saw before giving up. For logs, never for users.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExhaustionDiagnostics {
    pub last_raw_output: Option<String>,
    pub last_violation: Option<OutputValidationError>,
}

/// Copyable classification of [`MentorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MentorErrorKind {
    NotFound,
    InvalidInput,
    GatewayExhausted,
    ValidationExhausted,
    Timeout,
    Persistence,
}

/// Errors returned by a mentoring turn.
#[derive(Debug, Clone, Error)]
pub enum MentorError {
    /// The user or their assessment does not exist.
    #[error("{entity} not found for user {user_id}")]
    NotFound { entity: MissingEntity, user_id: UserId },

    /// The request itself is unusable (e.g. a blank message).
    #[error("invalid input: {0}")]
    InvalidInput(#[from] ValidationError),

    /// The attempt budget ran out on a gateway failure.
    #[error("model gateway failed after {attempts} attempt(s), last failure: {last_error}")]
    GatewayExhausted {
        attempts: u32,
        last_error: GatewayErrorKind,
        diagnostics: ExhaustionDiagnostics,
    },

    /// The attempt budget ran out on invalid model output.
    #[error("model output failed validation after {attempts} attempt(s)")]
    ValidationExhausted {
        attempts: u32,
        diagnostics: ExhaustionDiagnostics,
    },

    /// A deadline was exceeded.
    #[error("{stage} timed out after {}ms", .after.as_millis())]
    Timeout { stage: TimeoutStage, after: Duration },

    /// The turn could not be committed. Nothing was written.
    #[error("persistence failed: {0}")]
    Persistence(#[from] PersistenceError),
}

impl MentorError {
    /// Creates a not-found error.
    pub fn not_found(entity: MissingEntity, user_id: &UserId) -> Self {
        Self::NotFound {
            entity,
            user_id: user_id.clone(),
        }
    }

    pub fn kind(&self) -> MentorErrorKind {
        match self {
            MentorError::NotFound { .. } => MentorErrorKind::NotFound,
            MentorError::InvalidInput(_) => MentorErrorKind::InvalidInput,
            MentorError::GatewayExhausted { .. } => MentorErrorKind::GatewayExhausted,
            MentorError::ValidationExhausted { .. } => MentorErrorKind::ValidationExhausted,
            MentorError::Timeout { .. } => MentorErrorKind::Timeout,
            MentorError::Persistence(_) => MentorErrorKind::Persistence,
        }
    }

    /// Returns true if the caller sent something unusable.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self.kind(),
            MentorErrorKind::NotFound | MentorErrorKind::InvalidInput
        )
    }

    /// Loop diagnostics, present for exhaustion errors.
    pub fn diagnostics(&self) -> Option<&ExhaustionDiagnostics> {
        match self {
            MentorError::GatewayExhausted { diagnostics, .. }
            | MentorError::ValidationExhausted { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    /// Message safe to show the end user.
    ///
    /// Never contains model text or provider detail.
    pub fn user_message(&self) -> String {
        if self.is_client_error() {
            self.to_string()
        } else {
            UNAVAILABLE_MESSAGE.to_string()
        }
    }
}

impl From<MentorError> for DomainError {
    fn from(err: MentorError) -> Self {
        let code = match &err {
            MentorError::NotFound {
                entity: MissingEntity::User,
                ..
            } => ErrorCode::UserNotFound,
            MentorError::NotFound {
                entity: MissingEntity::Assessment,
                ..
            } => ErrorCode::AssessmentNotFound,
            MentorError::InvalidInput(_) => ErrorCode::ValidationFailed,
            MentorError::GatewayExhausted { .. } => ErrorCode::GatewayExhausted,
            MentorError::ValidationExhausted { .. } => ErrorCode::ValidationExhausted,
            MentorError::Timeout { .. } => ErrorCode::Timeout,
            MentorError::Persistence(PersistenceError::Conflict(_)) => ErrorCode::Conflict,
            MentorError::Persistence(_) => ErrorCode::DatabaseError,
        };
        DomainError::new(code, err.user_message())
    }
}
