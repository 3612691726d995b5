//! Mentor handlers - one mentoring turn end to end.
//!
//! - `ContextAssembler` - reads user state into a context bundle
//! - `ValidationRetryLoop` - drives the model gateway until output validates
//! - `StateCommitter` - commits the validated turn atomically
//! - `RunTurnHandler` - composes the three under a per-user lock

mod assemble_context;
mod errors;
mod retry_loop;
mod run_turn;
mod state_committer;
mod user_locks;

pub use assemble_context::{ContextAssembler, DEFAULT_HISTORY_WINDOW};
pub use errors::{
    ExhaustionDiagnostics, MentorError, MentorErrorKind, MissingEntity, TimeoutStage,
    UNAVAILABLE_MESSAGE,
};
pub use retry_loop::{AttemptOutcome, AttemptRecord, LoopOutcome, ValidationRetryLoop};
pub use run_turn::{MentorReply, RunTurnCommand, RunTurnHandler, TurnSettings};
pub use state_committer::{CommitResult, StateCommitter};
pub use user_locks::{UserTurnGuard, UserTurnLocks};
