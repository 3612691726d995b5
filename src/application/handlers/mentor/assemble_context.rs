//! Context assembly - reads stored state into a [`ContextBundle`].
//!
//! Pure read: nothing is written, and two calls with no commit in between
//! produce equal bundles.

use std::sync::Arc;

use crate::domain::foundation::{UserId, ValidationError};
use crate::domain::mentor::ContextBundle;
use crate::ports::MentorReader;

use super::errors::{MentorError, MissingEntity};

/// History window used when none is configured.
pub const DEFAULT_HISTORY_WINDOW: u32 = 20;

/// Builds the per-turn context bundle.
pub struct ContextAssembler<R: MentorReader> {
    reader: Arc<R>,
    history_window: u32,
}

impl<R: MentorReader> ContextAssembler<R> {
    /// Creates an assembler keeping at most `history_window` messages.
    pub fn new(reader: Arc<R>, history_window: u32) -> Self {
        Self {
            reader,
            history_window,
        }
    }

    /// Assembles the bundle for `user_id` sending `message`.
    ///
    /// A missing plan or projection is not an error; a missing user or
    /// assessment is.
    pub async fn assemble(
        &self,
        user_id: &UserId,
        message: &str,
    ) -> Result<ContextBundle, MentorError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(ValidationError::empty_field("message").into());
        }

        let user = self
            .reader
            .find_user(user_id)
            .await?
            .ok_or_else(|| MentorError::not_found(MissingEntity::User, user_id))?;

        let assessment = match self.reader.find_assessment(user_id).await? {
            Some(assessment) if assessment.belongs_to(user_id) => assessment,
            Some(assessment) => {
                tracing::warn!(
                    user_id = %user_id,
                    assessment_id = %assessment.id,
                    "Reader returned an assessment owned by another user"
                );
                return Err(MentorError::not_found(MissingEntity::Assessment, user_id));
            }
            None => return Err(MentorError::not_found(MissingEntity::Assessment, user_id)),
        };

        let mut window = self
            .reader
            .recent_messages(user_id, self.history_window)
            .await?;
        let excess = window
            .messages
            .len()
            .saturating_sub(self.history_window as usize);
        if excess > 0 {
            window.messages.drain(..excess);
        }

        let plan = self.reader.active_plan(user_id).await?;
        let projection = self.reader.current_projection(user_id).await?;

        tracing::debug!(
            user_id = %user_id,
            history = window.messages.len(),
            earlier = window.earlier_count(),
            has_plan = plan.is_some(),
            has_projection = projection.is_some(),
            "Assembled mentor context"
        );

        Ok(ContextBundle::new(
            &user, assessment, window, plan, projection, message,
        ))
    }
}
