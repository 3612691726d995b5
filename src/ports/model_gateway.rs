//! Model Gateway Port - Interface to the language-model backend.
//!
//! The gateway owns transport, credentials, and provider quirks. The core
//! only sees this contract:
//!
//! - it receives the full context bundle, the target schema, and on retry a
//!   corrective instruction describing what was wrong last time
//! - it returns [`RawOutput`] or a [`GatewayError`] of one of four kinds
//! - it keeps no memory between calls and never retries on its own
//!
//! # Example
//!
//! ```ignore
//! struct EchoGateway;
//!
//! #[async_trait]
//! impl ModelGateway for EchoGateway {
//!     async fn generate(
//!         &self,
//!         bundle: &ContextBundle,
//!         _schema: &OutputSchema,
//!         _corrective: Option<&CorrectiveInstruction>,
//!     ) -> Result<RawOutput, GatewayError> {
//!         Ok(RawOutput::Json(json!({ "reply": bundle.user_message() })))
//!     }
//!
//!     fn gateway_info(&self) -> GatewayInfo {
//!         GatewayInfo::new("echo", "echo-1")
//!     }
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::mentor::{ContextBundle, CorrectiveInstruction, OutputSchema, RawOutput};

/// Port for generating one mentor response.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Generates raw output for `bundle` targeting `schema`.
    ///
    /// `corrective` is `None` on the first attempt of a turn.
    async fn generate(
        &self,
        bundle: &ContextBundle,
        schema: &OutputSchema,
        corrective: Option<&CorrectiveInstruction>,
    ) -> Result<RawOutput, GatewayError>;

    /// Provider and model identification for logging.
    fn gateway_info(&self) -> GatewayInfo;
}

/// Provider identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayInfo {
    pub provider: String,
    pub model: String,
}

impl GatewayInfo {
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
        }
    }
}

/// Gateway failure kinds, without provider detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayErrorKind {
    RateLimited,
    Unavailable,
    Timeout,
    Malformed,
}

impl fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GatewayErrorKind::RateLimited => "rate_limited",
            GatewayErrorKind::Unavailable => "unavailable",
            GatewayErrorKind::Timeout => "timeout",
            GatewayErrorKind::Malformed => "malformed",
        };
        write!(f, "{}", s)
    }
}

/// Model gateway errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// Provider throttled the request.
    #[error("rate limited{}", retry_hint(.retry_after_secs))]
    RateLimited {
        /// Provider's suggested wait, if it sent one.
        retry_after_secs: Option<u32>,
    },

    /// Provider could not serve the request (outage, 5xx, auth, network).
    #[error("provider unavailable: {message}")]
    Unavailable { message: String },

    /// Provider did not answer in time.
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// Provider answered, but the body could not be decoded.
    ///
    /// `raw` keeps whatever text was received. The retry loop validates it
    /// as plain text, so the resulting violations drive the corrective
    /// instruction instead of a blind retry.
    #[error("malformed provider response: {detail}")]
    Malformed { raw: String, detail: String },
}

fn retry_hint(retry_after_secs: &Option<u32>) -> String {
    match retry_after_secs {
        Some(secs) => format!(": retry after {}s", secs),
        None => String::new(),
    }
}

impl GatewayError {
    /// Creates a rate limited error.
    pub fn rate_limited(retry_after_secs: Option<u32>) -> Self {
        Self::RateLimited { retry_after_secs }
    }

    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout {
            timeout_secs: timeout.as_secs(),
        }
    }

    /// Creates a malformed response error.
    pub fn malformed(raw: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Malformed {
            raw: raw.into(),
            detail: detail.into(),
        }
    }

    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::RateLimited { .. } => GatewayErrorKind::RateLimited,
            GatewayError::Unavailable { .. } => GatewayErrorKind::Unavailable,
            GatewayError::Timeout { .. } => GatewayErrorKind::Timeout,
            GatewayError::Malformed { .. } => GatewayErrorKind::Malformed,
        }
    }

    /// Provider's retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            GatewayError::RateLimited {
                retry_after_secs: Some(secs),
            } => Some(Duration::from_secs(u64::from(*secs))),
            _ => None,
        }
    }
}
