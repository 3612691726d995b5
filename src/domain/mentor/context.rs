//! Context bundle - the read-only snapshot one mentoring turn reasons over.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::domain::foundation::{Timestamp, UserId};

use super::assessment::Assessment;
use super::chat::{ChatMessage, MessageWindow};
use super::plan::DailyPlan;
use super::projection::FutureProjection;
use super::user::MentorUser;

/// A value that may not exist yet for a first-time user.
///
/// Serialized as `{"status": "none_yet"}` when absent so the model sees an
/// explicit marker instead of a missing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Snapshot<T> {
    Present(T),
    NoneYet,
}

impl<T> Snapshot<T> {
    /// Returns the value if present.
    pub fn as_option(&self) -> Option<&T> {
        match self {
            Snapshot::Present(value) => Some(value),
            Snapshot::NoneYet => None,
        }
    }

    /// Returns true if there is no value yet.
    pub fn is_none_yet(&self) -> bool {
        matches!(self, Snapshot::NoneYet)
    }
}

impl<T> From<Option<T>> for Snapshot<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => Snapshot::Present(value),
            None => Snapshot::NoneYet,
        }
    }
}

/// Everything the model sees for one turn. Never mutated after assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextBundle {
    user_id: UserId,
    display_name: Option<String>,
    assessment: Assessment,
    /// Most recent messages, oldest first.
    history: Vec<ChatMessage>,
    /// Messages older than `history` that were left out.
    earlier_message_count: u64,
    plan: Snapshot<DailyPlan>,
    projection: Snapshot<FutureProjection>,
    user_message: String,
}

impl ContextBundle {
    /// Assembles a bundle from already-loaded user state.
    pub fn new(
        user: &MentorUser,
        assessment: Assessment,
        window: MessageWindow,
        plan: Option<DailyPlan>,
        projection: Option<FutureProjection>,
        user_message: impl Into<String>,
    ) -> Self {
        let earlier_message_count = window.earlier_count();
        Self {
            user_id: user.id.clone(),
            display_name: user.display_name.clone(),
            assessment,
            history: window.messages,
            earlier_message_count,
            plan: plan.into(),
            projection: projection.into(),
            user_message: user_message.into(),
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn display_name(&self) -> Option<&str> {
        self.display_name.as_deref()
    }

    pub fn assessment(&self) -> &Assessment {
        &self.assessment
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn earlier_message_count(&self) -> u64 {
        self.earlier_message_count
    }

    pub fn plan(&self) -> &Snapshot<DailyPlan> {
        &self.plan
    }

    pub fn projection(&self) -> &Snapshot<FutureProjection> {
        &self.projection
    }

    /// The message the user sent this turn.
    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    /// Timestamp of the newest stored message, if any.
    pub fn last_message_at(&self) -> Option<&Timestamp> {
        self.history.last().map(|m| &m.created_at)
    }

    /// SHA-256 of the canonical JSON encoding, hex encoded.
    ///
    /// Equal bundles always have equal fingerprints.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let bytes = serde_json::to_vec(self)?;
        let digest = Sha256::digest(&bytes);
        Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
    }

    /// Renders the bundle as YAML for inclusion in a prompt.
    pub fn render_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}
