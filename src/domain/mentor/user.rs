//! The user a mentoring conversation belongs to.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{Timestamp, UserId};

/// Identity anchor for all mentoring state.
///
/// Profile fields beyond the display name are owned by the account
/// service and never read here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentorUser {
    pub id: UserId,
    pub display_name: Option<String>,
    pub created_at: Timestamp,
}

impl MentorUser {
    /// Creates a user record with no display name.
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            display_name: None,
            created_at: Timestamp::now(),
        }
    }

    /// Sets the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}
