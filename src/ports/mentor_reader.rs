//! Mentor Reader Port - Read access to a user's mentoring state.
//!
//! Used by context assembly only. Implementations must not mutate
//! anything.

use async_trait::async_trait;

use crate::domain::foundation::UserId;
use crate::domain::mentor::{Assessment, DailyPlan, FutureProjection, MentorUser, MessageWindow};

use super::PersistenceError;

/// Port for reading user-scoped mentoring state.
#[async_trait]
pub trait MentorReader: Send + Sync {
    /// Finds the user record.
    async fn find_user(&self, user_id: &UserId) -> Result<Option<MentorUser>, PersistenceError>;

    /// Finds the user's current (most recently taken) assessment.
    async fn find_assessment(&self, user_id: &UserId) -> Result<Option<Assessment>, PersistenceError>;

    /// Returns the newest `limit` chat messages in chronological order,
    /// together with the user's total message count.
    async fn recent_messages(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<MessageWindow, PersistenceError>;

    /// Finds the user's active daily plan.
    async fn active_plan(&self, user_id: &UserId) -> Result<Option<DailyPlan>, PersistenceError>;

    /// Finds the user's newest projection revision.
    async fn current_projection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<FutureProjection>, PersistenceError>;
}
