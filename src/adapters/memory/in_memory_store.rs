//! In-Memory Mentor Store
//!
//! Implements both [`MentorReader`] and [`TurnWriter`] over one lock, so a
//! committed turn becomes visible all at once. Useful for testing and
//! development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

use crate::domain::foundation::UserId;
use crate::domain::mentor::{
    Assessment, ChatMessage, DailyPlan, FutureProjection, MentorUser, MessageWindow,
};
use crate::ports::{MentorReader, PersistenceError, TurnChangeSet, TurnWriter};

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<UserId, MentorUser>,
    assessments: HashMap<UserId, Vec<Assessment>>,
    messages: HashMap<UserId, Vec<ChatMessage>>,
    plans: HashMap<UserId, Vec<DailyPlan>>,
    projections: HashMap<UserId, Vec<FutureProjection>>,
}

impl StoreState {
    fn active_plan(&self, user_id: &UserId) -> Option<&DailyPlan> {
        self.plans
            .get(user_id)
            .and_then(|plans| plans.iter().rev().find(|p| p.is_active()))
    }

    fn current_projection(&self, user_id: &UserId) -> Option<&FutureProjection> {
        self.projections
            .get(user_id)
            .and_then(|revisions| revisions.iter().max_by_key(|p| p.revision))
    }

    /// Rejects `changes` if storage moved since they were computed.
    fn check(&self, changes: &TurnChangeSet) -> Result<(), PersistenceError> {
        let user_id = &changes.user_id;

        if let Some(last) = self.messages.get(user_id).and_then(|m| m.last()) {
            if last.created_at >= changes.user_message.created_at {
                return Err(PersistenceError::conflict(format!(
                    "chat history for {} has a message newer than this turn",
                    user_id
                )));
            }
        }

        if let Some(supersession) = &changes.plan {
            let active = self.active_plan(user_id).map(|p| p.id);
            if active != supersession.replaces {
                return Err(PersistenceError::conflict(format!(
                    "active plan for {} changed since the turn started",
                    user_id
                )));
            }
        }

        if let Some(revision) = &changes.projection {
            let current = self.current_projection(user_id).map(|p| (p.id, p.revision));
            if current != revision.follows {
                return Err(PersistenceError::conflict(format!(
                    "projection for {} was revised since the turn started",
                    user_id
                )));
            }
        }

        Ok(())
    }
}

/// In-memory store for mentoring state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryMentorStore {
    state: Arc<RwLock<StoreState>>,
    /// Error returned by the next commit instead of writing.
    fail_next: Arc<Mutex<Option<PersistenceError>>>,
}

impl InMemoryMentorStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, user: MentorUser) {
        self.state.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn insert_assessment(&self, assessment: Assessment) {
        self.state
            .write()
            .await
            .assessments
            .entry(assessment.user_id.clone())
            .or_default()
            .push(assessment);
    }

    /// Appends a message outside of any turn, e.g. to seed history.
    pub async fn insert_message(&self, message: ChatMessage) {
        self.state
            .write()
            .await
            .messages
            .entry(message.user_id.clone())
            .or_default()
            .push(message);
    }

    /// Stores a plan as-is, without superseding anything.
    pub async fn insert_plan(&self, plan: DailyPlan) {
        self.state
            .write()
            .await
            .plans
            .entry(plan.user_id.clone())
            .or_default()
            .push(plan);
    }

    pub async fn insert_projection(&self, projection: FutureProjection) {
        self.state
            .write()
            .await
            .projections
            .entry(projection.user_id.clone())
            .or_default()
            .push(projection);
    }

    /// Makes the next commit fail with `error` and write nothing.
    pub fn fail_next_commit(&self, error: PersistenceError) {
        *self
            .fail_next
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
    }

    /// All messages of a user in insertion order.
    pub async fn messages_for(&self, user_id: &UserId) -> Vec<ChatMessage> {
        self.state
            .read()
            .await
            .messages
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All plans of a user, active and superseded.
    pub async fn plans_for(&self, user_id: &UserId) -> Vec<DailyPlan> {
        self.state
            .read()
            .await
            .plans
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// All projection revisions of a user.
    pub async fn projections_for(&self, user_id: &UserId) -> Vec<FutureProjection> {
        self.state
            .read()
            .await
            .projections
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Clear all stored data (useful for tests)
    pub async fn clear(&self) {
        *self.state.write().await = StoreState::default();
    }

    fn take_injected_failure(&self) -> Option<PersistenceError> {
        self.fail_next
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }
}

#[async_trait]
impl MentorReader for InMemoryMentorStore {
    async fn find_user(&self, user_id: &UserId) -> Result<Option<MentorUser>, PersistenceError> {
        Ok(self.state.read().await.users.get(user_id).cloned())
    }

    async fn find_assessment(&self, user_id: &UserId) -> Result<Option<Assessment>, PersistenceError> {
        let state = self.state.read().await;
        Ok(state
            .assessments
            .get(user_id)
            .and_then(|all| all.iter().max_by_key(|a| a.taken_at))
            .cloned())
    }

    async fn recent_messages(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<MessageWindow, PersistenceError> {
        let state = self.state.read().await;
        let mut all = state.messages.get(user_id).cloned().unwrap_or_default();
        all.sort_by_key(|m| m.created_at);

        let total = all.len() as u64;
        let skip = all.len().saturating_sub(limit as usize);
        Ok(MessageWindow {
            messages: all.split_off(skip),
            total,
        })
    }

    async fn active_plan(&self, user_id: &UserId) -> Result<Option<DailyPlan>, PersistenceError> {
        Ok(self.state.read().await.active_plan(user_id).cloned())
    }

    async fn current_projection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<FutureProjection>, PersistenceError> {
        Ok(self.state.read().await.current_projection(user_id).cloned())
    }
}

#[async_trait]
impl TurnWriter for InMemoryMentorStore {
    async fn commit_turn(&self, changes: &TurnChangeSet) -> Result<(), PersistenceError> {
        let mut state = self.state.write().await;

        if let Some(error) = self.take_injected_failure() {
            return Err(error);
        }
        state.check(changes)?;

        let user_id = &changes.user_id;
        state
            .messages
            .entry(user_id.clone())
            .or_default()
            .extend(changes.messages().into_iter().cloned());

        if let Some(supersession) = &changes.plan {
            let plans = state.plans.entry(user_id.clone()).or_default();
            for plan in plans.iter_mut().filter(|p| p.is_active()) {
                plan.mark_superseded();
            }
            plans.push(supersession.plan.clone());
        }

        if let Some(revision) = &changes.projection {
            state
                .projections
                .entry(user_id.clone())
                .or_default()
                .push(revision.projection.clone());
        }

        Ok(())
    }
}
