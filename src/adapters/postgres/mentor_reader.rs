//! PostgreSQL implementation of MentorReader.
//!
//! Read-only queries over the mentoring tables.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::foundation::UserId;
use crate::domain::mentor::{Assessment, DailyPlan, FutureProjection, MentorUser, MessageWindow};
use crate::ports::{MentorReader, PersistenceError};

use super::rows::{
    db_error, row_to_assessment, row_to_message, row_to_plan, row_to_projection, row_to_user,
};

/// PostgreSQL implementation of MentorReader.
#[derive(Clone)]
pub struct PostgresMentorReader {
    pool: PgPool,
}

impl PostgresMentorReader {
    /// Creates a new PostgresMentorReader.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MentorReader for PostgresMentorReader {
    async fn find_user(&self, user_id: &UserId) -> Result<Option<MentorUser>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, display_name, created_at
            FROM mentor_users
            WHERE id = $1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch user", e))?;

        row.as_ref().map(row_to_user).transpose()
    }

    async fn find_assessment(&self, user_id: &UserId) -> Result<Option<Assessment>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, answers, taken_at
            FROM assessments
            WHERE user_id = $1
            ORDER BY taken_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch assessment", e))?;

        row.as_ref().map(row_to_assessment).transpose()
    }

    async fn recent_messages(
        &self,
        user_id: &UserId,
        limit: u32,
    ) -> Result<MessageWindow, PersistenceError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, role, content, created_at
            FROM chat_messages
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch messages", e))?;

        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM chat_messages WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_error("Failed to count messages", e))?;

        let mut messages = rows
            .iter()
            .map(row_to_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();

        Ok(MessageWindow {
            messages,
            total: total.0.max(0) as u64,
        })
    }

    async fn active_plan(&self, user_id: &UserId) -> Result<Option<DailyPlan>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, plan_date, items, fields, status, supersedes, created_at
            FROM daily_plans
            WHERE user_id = $1 AND status = 'active'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch active plan", e))?;

        row.as_ref().map(row_to_plan).transpose()
    }

    async fn current_projection(
        &self,
        user_id: &UserId,
    ) -> Result<Option<FutureProjection>, PersistenceError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, revision, fields, previous_id, changes, created_at
            FROM future_projections
            WHERE user_id = $1
            ORDER BY revision DESC
            LIMIT 1
            "#,
        )
        .bind(user_id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to fetch projection", e))?;

        row.as_ref().map(row_to_projection).transpose()
    }
}
