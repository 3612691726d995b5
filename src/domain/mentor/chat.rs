//! Chat history between the user and the mentor.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{MessageId, Timestamp, UserId};

/// Who authored a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    User,
    Mentor,
}

/// One turn of the mentoring conversation. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub user_id: UserId,
    pub role: ChatRole,
    pub content: String,
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Creates a message authored by the user.
    pub fn from_user(user_id: UserId, content: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: MessageId::new(),
            user_id,
            role: ChatRole::User,
            content: content.into(),
            created_at,
        }
    }

    /// Creates a message authored by the mentor.
    pub fn from_mentor(user_id: UserId, content: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: MessageId::new(),
            user_id,
            role: ChatRole::Mentor,
            content: content.into(),
            created_at,
        }
    }
}

/// The most recent slice of a user's chat history.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageWindow {
    /// Messages in chronological order (oldest first).
    pub messages: Vec<ChatMessage>,
    /// Total number of messages the user has, including those outside the window.
    pub total: u64,
}

impl MessageWindow {
    /// Number of messages older than the window.
    pub fn earlier_count(&self) -> u64 {
        self.total.saturating_sub(self.messages.len() as u64)
    }
}
