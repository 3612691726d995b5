//! RunTurn command handler.
//!
//! One mentoring turn: assemble context, run the validation-retry loop,
//! commit the validated result. Turns for the same user are serialized.
//!
//! # Cancellation
//!
//! Dropping the future before the loop succeeds leaves storage untouched.
//! Once the loop has succeeded the commit runs on its own task, so dropping
//! the future after that point still lets the commit finish or fail as a
//! whole.

use std::sync::Arc;
use tracing::Instrument;

use crate::domain::foundation::{MessageId, UserId};
use crate::domain::mentor::{DailyPlan, FutureProjection, OutputSchema, RetryPolicy};
use crate::ports::{MentorReader, ModelGateway, PersistenceError, TurnWriter};

use super::assemble_context::{ContextAssembler, DEFAULT_HISTORY_WINDOW};
use super::errors::MentorError;
use super::retry_loop::ValidationRetryLoop;
use super::state_committer::StateCommitter;
use super::user_locks::UserTurnLocks;

/// Tunables for the turn pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnSettings {
    /// Chat messages included in the context.
    pub history_window: u32,
    pub policy: RetryPolicy,
    pub schema: OutputSchema,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            history_window: DEFAULT_HISTORY_WINDOW,
            policy: RetryPolicy::default(),
            schema: OutputSchema::default(),
        }
    }
}

/// Command to run one mentoring turn.
#[derive(Debug, Clone)]
pub struct RunTurnCommand {
    pub user_id: UserId,
    pub message: String,
}

impl RunTurnCommand {
    pub fn new(user_id: UserId, message: impl Into<String>) -> Self {
        Self {
            user_id,
            message: message.into(),
        }
    }
}

/// What the user gets back from a successful turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentorReply {
    pub user_message_id: MessageId,
    pub mentor_message_id: MessageId,
    pub reply: String,
    /// The new active plan, if this turn changed it.
    pub plan: Option<DailyPlan>,
    /// The new projection revision, if this turn changed it.
    pub projection: Option<FutureProjection>,
    /// Gateway calls the turn needed.
    pub attempts: u32,
}

/// Handler for [`RunTurnCommand`].
pub struct RunTurnHandler<R, G, W>
where
    R: MentorReader,
    G: ModelGateway,
    W: TurnWriter,
{
    assembler: ContextAssembler<R>,
    retry_loop: ValidationRetryLoop<G>,
    committer: StateCommitter<W>,
    locks: UserTurnLocks,
}

impl<R, G, W> RunTurnHandler<R, G, W>
where
    R: MentorReader,
    G: ModelGateway,
    W: TurnWriter + 'static,
{
    pub fn new(reader: Arc<R>, gateway: Arc<G>, writer: Arc<W>, settings: TurnSettings) -> Self {
        Self {
            assembler: ContextAssembler::new(reader, settings.history_window),
            retry_loop: ValidationRetryLoop::new(
                gateway,
                Arc::new(settings.schema),
                settings.policy,
            ),
            committer: StateCommitter::new(writer),
            locks: UserTurnLocks::new(),
        }
    }

    /// Runs one turn.
    ///
    /// Either every mutation of the turn is committed or none is. Exhausted,
    /// timed-out and failed turns write nothing.
    pub async fn handle(&self, cmd: RunTurnCommand) -> Result<MentorReply, MentorError> {
        let span = tracing::info_span!("mentor_turn", user_id = %cmd.user_id);
        self.run(cmd).instrument(span).await
    }

    async fn run(&self, cmd: RunTurnCommand) -> Result<MentorReply, MentorError> {
        let guard = self.locks.acquire(&cmd.user_id).await;

        let bundle = self.assembler.assemble(&cmd.user_id, &cmd.message).await?;
        let outcome = self.retry_loop.run(&bundle).await.map_err(|e| {
            tracing::warn!(kind = ?e.kind(), error = %e, "Mentor turn failed");
            e
        })?;

        let changes = self.committer.prepare(&bundle, &outcome.output);
        let committer = self.committer.clone();
        let commit = tokio::spawn(
            async move {
                let result = committer.commit(changes).await;
                drop(guard);
                result
            }
            .in_current_span(),
        );

        let committed = commit
            .await
            .map_err(|e| PersistenceError::database(format!("commit task failed: {}", e)))??;

        Ok(MentorReply {
            user_message_id: committed.user_message_id,
            mentor_message_id: committed.mentor_message_id,
            reply: outcome.output.reply().to_string(),
            plan: committed.plan,
            projection: committed.projection,
            attempts: outcome.attempts,
        })
    }
}
