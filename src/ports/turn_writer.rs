//! Turn Writer Port - Transactional persistence of one mentoring turn.
//!
//! A [`TurnChangeSet`] holds every mutation a turn makes. Writers apply it
//! in a single transaction: either all of it becomes visible or none of it
//! does.
//!
//! # Optimistic concurrency
//!
//! The change set names the plan and projection revision it was computed
//! from. If storage has moved on (another writer superseded the plan or
//! added a revision), the writer must reject the whole change set with
//! [`PersistenceError::Conflict`] rather than overwrite.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{PlanId, ProjectionId, UserId};
use crate::domain::mentor::{ChatMessage, DailyPlan, FutureProjection};

/// Port for committing a turn atomically.
#[async_trait]
pub trait TurnWriter: Send + Sync {
    /// Applies every mutation in `changes`, or none of them.
    async fn commit_turn(&self, changes: &TurnChangeSet) -> Result<(), PersistenceError>;
}

/// Replacement of the active plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSupersession {
    /// The plan expected to be active right now; `None` for a first plan.
    pub replaces: Option<PlanId>,
    /// The new active plan.
    pub plan: DailyPlan,
}

/// A new projection revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionRevision {
    /// The revision expected to be current; `None` for a first projection.
    pub follows: Option<(ProjectionId, u32)>,
    pub projection: FutureProjection,
}

/// Every mutation one turn makes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnChangeSet {
    pub user_id: UserId,
    /// The user's message. Inserted first.
    pub user_message: ChatMessage,
    /// The mentor's validated reply. Inserted second.
    pub mentor_message: ChatMessage,
    pub plan: Option<PlanSupersession>,
    pub projection: Option<ProjectionRevision>,
}

impl TurnChangeSet {
    /// The chat messages in insertion order.
    pub fn messages(&self) -> [&ChatMessage; 2] {
        [&self.user_message, &self.mentor_message]
    }
}

/// Storage errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The underlying store failed.
    #[error("database error: {0}")]
    Database(String),

    /// Storage changed since the turn's context was assembled.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}
