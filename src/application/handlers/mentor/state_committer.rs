//! State committer - turns a validated output into one atomic write.
//!
//! Only reached from the `Succeeded` state of the retry loop. Building the
//! change set is pure; applying it is a single [`TurnWriter`] call.

use std::sync::Arc;

use crate::domain::foundation::{MessageId, Timestamp};
use crate::domain::mentor::{
    ChatMessage, ContextBundle, DailyPlan, FutureProjection, MentorOutput,
};
use crate::ports::{
    PersistenceError, PlanSupersession, ProjectionRevision, TurnChangeSet, TurnWriter,
};

/// What a successful commit made visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub user_message_id: MessageId,
    pub mentor_message_id: MessageId,
    /// The new active plan, if the turn replaced it.
    pub plan: Option<DailyPlan>,
    /// The new projection revision, if the turn added one.
    pub projection: Option<FutureProjection>,
}

impl From<&TurnChangeSet> for CommitResult {
    fn from(changes: &TurnChangeSet) -> Self {
        Self {
            user_message_id: changes.user_message.id,
            mentor_message_id: changes.mentor_message.id,
            plan: changes.plan.as_ref().map(|p| p.plan.clone()),
            projection: changes.projection.as_ref().map(|p| p.projection.clone()),
        }
    }
}

/// Persists a validated turn.
pub struct StateCommitter<W: TurnWriter> {
    writer: Arc<W>,
}

impl<W: TurnWriter> Clone for StateCommitter<W> {
    fn clone(&self) -> Self {
        Self {
            writer: Arc::clone(&self.writer),
        }
    }
}

impl<W: TurnWriter> StateCommitter<W> {
    pub fn new(writer: Arc<W>) -> Self {
        Self { writer }
    }

    /// Builds every mutation the turn makes.
    ///
    /// The user message is timestamped after the newest message in the
    /// bundle and the mentor message after the user message. A plan or
    /// projection is only produced for a non-empty delta, and names the
    /// snapshot it was derived from so the writer can detect conflicts.
    pub fn prepare(&self, bundle: &ContextBundle, output: &MentorOutput) -> TurnChangeSet {
        let user_id = bundle.user_id().clone();
        let user_at = Timestamp::now_after(bundle.last_message_at());
        let mentor_at = Timestamp::now_after(Some(&user_at));

        let user_message = ChatMessage::from_user(user_id.clone(), bundle.user_message(), user_at);
        let mentor_message = ChatMessage::from_mentor(user_id.clone(), output.reply(), mentor_at);

        let plan = output
            .plan_delta()
            .filter(|delta| !delta.is_empty())
            .map(|delta| {
                let previous = bundle.plan().as_option();
                PlanSupersession {
                    replaces: previous.map(|p| p.id),
                    plan: DailyPlan::supersede(previous, user_id.clone(), delta, mentor_at),
                }
            });

        let projection = output
            .projection_delta()
            .filter(|delta| !delta.is_empty())
            .map(|delta| {
                let previous = bundle.projection().as_option();
                ProjectionRevision {
                    follows: previous.map(|p| (p.id, p.revision)),
                    projection: FutureProjection::next_revision(
                        previous,
                        user_id.clone(),
                        delta,
                        mentor_at,
                    ),
                }
            });

        TurnChangeSet {
            user_id,
            user_message,
            mentor_message,
            plan,
            projection,
        }
    }

    /// Applies `changes` atomically.
    pub async fn commit(&self, changes: TurnChangeSet) -> Result<CommitResult, PersistenceError> {
        self.writer.commit_turn(&changes).await.map_err(|e| {
            tracing::error!(
                user_id = %changes.user_id,
                error = %e,
                "Failed to commit mentor turn"
            );
            e
        })?;

        tracing::info!(
            user_id = %changes.user_id,
            mentor_message_id = %changes.mentor_message.id,
            plan_replaced = changes.plan.is_some(),
            projection_revised = changes.projection.is_some(),
            "Committed mentor turn"
        );

        Ok(CommitResult::from(&changes))
    }
}
