//! PostgreSQL implementation of TurnWriter.
//!
//! One transaction per turn. The user's row is locked with `FOR UPDATE`
//! first, so concurrent commits for the same user queue behind each other
//! even across processes. The optimistic checks then run against state no
//! one else can change until the transaction ends.

use async_trait::async_trait;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};

use crate::domain::foundation::{PlanId, ProjectionId, UserId};
use crate::domain::mentor::{ChatMessage, PlanStatus};
use crate::ports::{
    PersistenceError, PlanSupersession, ProjectionRevision, TurnChangeSet, TurnWriter,
};

use super::rows::{db_error, plan_status_to_str, revision_to_i32, role_to_str};

/// PostgreSQL implementation of TurnWriter.
#[derive(Clone)]
pub struct PostgresTurnWriter {
    pool: PgPool,
}

impl PostgresTurnWriter {
    /// Creates a new PostgresTurnWriter.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TurnWriter for PostgresTurnWriter {
    async fn commit_turn(&self, changes: &TurnChangeSet) -> Result<(), PersistenceError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to start transaction", e))?;

        lock_user(&mut tx, &changes.user_id).await?;
        check_history(&mut tx, changes).await?;

        if let Some(supersession) = &changes.plan {
            supersede_plan(&mut tx, &changes.user_id, supersession).await?;
        }
        if let Some(revision) = &changes.projection {
            insert_projection(&mut tx, &changes.user_id, revision).await?;
        }
        for message in changes.messages() {
            insert_message(&mut tx, message).await?;
        }

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit transaction", e))?;

        Ok(())
    }
}

async fn lock_user(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
) -> Result<(), PersistenceError> {
    let locked: Option<(String,)> =
        sqlx::query_as("SELECT id FROM mentor_users WHERE id = $1 FOR UPDATE")
            .bind(user_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to lock user", e))?;

    match locked {
        Some(_) => Ok(()),
        None => Err(PersistenceError::conflict(format!(
            "user {} no longer exists",
            user_id
        ))),
    }
}

async fn check_history(
    tx: &mut Transaction<'_, Postgres>,
    changes: &TurnChangeSet,
) -> Result<(), PersistenceError> {
    let newest: (Option<chrono::DateTime<chrono::Utc>>,) =
        sqlx::query_as("SELECT MAX(created_at) FROM chat_messages WHERE user_id = $1")
            .bind(changes.user_id.as_str())
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to read newest message", e))?;

    match newest.0 {
        Some(at) if at >= *changes.user_message.created_at.as_datetime() => {
            Err(PersistenceError::conflict(format!(
                "chat history for {} has a message newer than this turn",
                changes.user_id
            )))
        }
        _ => Ok(()),
    }
}

async fn supersede_plan(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    supersession: &PlanSupersession,
) -> Result<(), PersistenceError> {
    let active: Option<(uuid::Uuid,)> =
        sqlx::query_as("SELECT id FROM daily_plans WHERE user_id = $1 AND status = 'active'")
            .bind(user_id.as_str())
            .fetch_optional(&mut **tx)
            .await
            .map_err(|e| db_error("Failed to read active plan", e))?;

    if active.map(|(id,)| PlanId::from_uuid(id)) != supersession.replaces {
        return Err(PersistenceError::conflict(format!(
            "active plan for {} changed since the turn started",
            user_id
        )));
    }

    sqlx::query("UPDATE daily_plans SET status = $2 WHERE user_id = $1 AND status = 'active'")
        .bind(user_id.as_str())
        .bind(plan_status_to_str(PlanStatus::Superseded))
        .execute(&mut **tx)
        .await
        .map_err(|e| db_error("Failed to supersede plan", e))?;

    let plan = &supersession.plan;
    sqlx::query(
        r#"
        INSERT INTO daily_plans (
            id, user_id, plan_date, items, fields, status, supersedes, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(plan.id.as_uuid())
    .bind(plan.user_id.as_str())
    .bind(plan.plan_date)
    .bind(Json(&plan.items))
    .bind(Json(&plan.fields))
    .bind(plan_status_to_str(plan.status))
    .bind(plan.supersedes.map(|id| *id.as_uuid()))
    .bind(plan.created_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to insert plan", e))?;

    Ok(())
}

async fn insert_projection(
    tx: &mut Transaction<'_, Postgres>,
    user_id: &UserId,
    revision: &ProjectionRevision,
) -> Result<(), PersistenceError> {
    let current: Option<(uuid::Uuid, i32)> = sqlx::query_as(
        "SELECT id, revision FROM future_projections WHERE user_id = $1 ORDER BY revision DESC LIMIT 1",
    )
    .bind(user_id.as_str())
    .fetch_optional(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to read current projection", e))?;

    let expected = revision
        .follows
        .map(|(id, rev)| revision_to_i32(rev).map(|rev| (*id.as_uuid(), rev)))
        .transpose()?;
    if current != expected {
        return Err(PersistenceError::conflict(format!(
            "projection for {} was revised since the turn started",
            user_id
        )));
    }

    let projection = &revision.projection;
    sqlx::query(
        r#"
        INSERT INTO future_projections (
            id, user_id, revision, fields, previous_id, changes, created_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(projection.id.as_uuid())
    .bind(projection.user_id.as_str())
    .bind(revision_to_i32(projection.revision)?)
    .bind(Json(&projection.fields))
    .bind(projection.previous_id.map(|id: ProjectionId| *id.as_uuid()))
    .bind(Json(&projection.changes))
    .bind(projection.created_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to insert projection", e))?;

    Ok(())
}

async fn insert_message(
    tx: &mut Transaction<'_, Postgres>,
    message: &ChatMessage,
) -> Result<(), PersistenceError> {
    sqlx::query(
        r#"
        INSERT INTO chat_messages (id, user_id, role, content, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(message.user_id.as_str())
    .bind(role_to_str(message.role))
    .bind(&message.content)
    .bind(message.created_at.as_datetime())
    .execute(&mut **tx)
    .await
    .map_err(|e| db_error("Failed to insert message", e))?;

    Ok(())
}
