//! Mentor module - the state a mentoring turn reads and produces.
//!
//! - `assessment`, `chat`, `plan`, `projection`, `user`: stored user state
//! - `context`: the per-turn read-only [`ContextBundle`]
//! - `output`: the [`OutputSchema`] model output must satisfy
//! - `retry`: policy and state vocabulary of the validation-retry loop

mod assessment;
mod chat;
mod context;
mod output;
mod plan;
mod projection;
mod retry;
mod user;

pub use assessment::{AnswerValue, Assessment, AssessmentAnswer};
pub use chat::{ChatMessage, ChatRole, MessageWindow};
pub use context::{ContextBundle, Snapshot};
pub use output::{
    MentorOutput, OutputSchema, OutputValidationError, OutputViolation, RawOutput,
    DEFAULT_PLAN_FIELDS, DEFAULT_PROJECTION_FIELDS, PLAN_DELTA_FIELD, PLAN_ITEMS_FIELD,
    PROJECTION_DELTA_FIELD, REPLY_FIELD,
};
pub use plan::{DailyPlan, PlanDelta, PlanStatus};
pub use projection::{FieldChange, FutureProjection, ProjectionDelta};
pub use retry::{CorrectiveInstruction, LoopState, RetryPolicy, MAX_ATTEMPTS_LIMIT};
pub use user::MentorUser;
