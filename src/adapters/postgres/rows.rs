//! Row decoding and enum mapping shared by the PostgreSQL adapters.

use serde::de::DeserializeOwned;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row};

use crate::domain::foundation::{
    AssessmentId, MessageId, PlanId, ProjectionId, Timestamp, UserId,
};
use crate::domain::mentor::{
    Assessment, AssessmentAnswer, ChatMessage, ChatRole, DailyPlan, FieldChange,
    FutureProjection, MentorUser, PlanStatus,
};
use crate::ports::PersistenceError;

/// SQLSTATE for unique constraint violations.
const UNIQUE_VIOLATION: &str = "23505";

/// Maps a sqlx error, treating unique violations as conflicts.
pub(super) fn db_error(context: &str, err: sqlx::Error) -> PersistenceError {
    let is_unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION);

    if is_unique_violation {
        PersistenceError::conflict(format!("{}: {}", context, err))
    } else {
        PersistenceError::database(format!("{}: {}", context, err))
    }
}

fn column<'r, T>(row: &'r PgRow, name: &str) -> Result<T, PersistenceError>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(name)
        .map_err(|e| PersistenceError::database(format!("Failed to get {}: {}", name, e)))
}

fn json_column<T: DeserializeOwned>(row: &PgRow, name: &str) -> Result<T, PersistenceError> {
    let Json(value) = row
        .try_get::<Json<T>, _>(name)
        .map_err(|e| PersistenceError::serialization(format!("Failed to decode {}: {}", name, e)))?;
    Ok(value)
}

fn user_id(row: &PgRow) -> Result<UserId, PersistenceError> {
    let raw: String = column(row, "user_id")?;
    UserId::new(raw).map_err(|e| PersistenceError::database(format!("Invalid user_id: {}", e)))
}

fn timestamp(row: &PgRow, name: &str) -> Result<Timestamp, PersistenceError> {
    let value: chrono::DateTime<chrono::Utc> = column(row, name)?;
    Ok(Timestamp::from_datetime(value))
}

pub(super) fn role_to_str(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "user",
        ChatRole::Mentor => "mentor",
    }
}

pub(super) fn str_to_role(s: &str) -> Result<ChatRole, PersistenceError> {
    match s {
        "user" => Ok(ChatRole::User),
        "mentor" => Ok(ChatRole::Mentor),
        _ => Err(PersistenceError::database(format!("Invalid chat role: {}", s))),
    }
}

pub(super) fn plan_status_to_str(status: PlanStatus) -> &'static str {
    match status {
        PlanStatus::Active => "active",
        PlanStatus::Superseded => "superseded",
    }
}

pub(super) fn str_to_plan_status(s: &str) -> Result<PlanStatus, PersistenceError> {
    match s {
        "active" => Ok(PlanStatus::Active),
        "superseded" => Ok(PlanStatus::Superseded),
        _ => Err(PersistenceError::database(format!("Invalid plan status: {}", s))),
    }
}

/// Revision numbers are stored as INT4.
pub(super) fn revision_to_i32(revision: u32) -> Result<i32, PersistenceError> {
    i32::try_from(revision)
        .map_err(|_| PersistenceError::database(format!("Revision out of range: {}", revision)))
}

fn i32_to_revision(value: i32) -> Result<u32, PersistenceError> {
    u32::try_from(value)
        .map_err(|_| PersistenceError::database(format!("Invalid stored revision: {}", value)))
}

pub(super) fn row_to_user(row: &PgRow) -> Result<MentorUser, PersistenceError> {
    let id: String = column(row, "id")?;
    Ok(MentorUser {
        id: UserId::new(id)
            .map_err(|e| PersistenceError::database(format!("Invalid user id: {}", e)))?,
        display_name: column(row, "display_name")?,
        created_at: timestamp(row, "created_at")?,
    })
}

pub(super) fn row_to_assessment(row: &PgRow) -> Result<Assessment, PersistenceError> {
    let id: uuid::Uuid = column(row, "id")?;
    let answers: Vec<AssessmentAnswer> = json_column(row, "answers")?;
    Ok(Assessment {
        id: AssessmentId::from_uuid(id),
        user_id: user_id(row)?,
        answers,
        taken_at: timestamp(row, "taken_at")?,
    })
}

pub(super) fn row_to_message(row: &PgRow) -> Result<ChatMessage, PersistenceError> {
    let id: uuid::Uuid = column(row, "id")?;
    let role: String = column(row, "role")?;
    Ok(ChatMessage {
        id: MessageId::from_uuid(id),
        user_id: user_id(row)?,
        role: str_to_role(&role)?,
        content: column(row, "content")?,
        created_at: timestamp(row, "created_at")?,
    })
}

pub(super) fn row_to_plan(row: &PgRow) -> Result<DailyPlan, PersistenceError> {
    let id: uuid::Uuid = column(row, "id")?;
    let status: String = column(row, "status")?;
    let supersedes: Option<uuid::Uuid> = column(row, "supersedes")?;
    Ok(DailyPlan {
        id: PlanId::from_uuid(id),
        user_id: user_id(row)?,
        plan_date: column(row, "plan_date")?,
        items: json_column(row, "items")?,
        fields: json_column(row, "fields")?,
        status: str_to_plan_status(&status)?,
        supersedes: supersedes.map(PlanId::from_uuid),
        created_at: timestamp(row, "created_at")?,
    })
}

pub(super) fn row_to_projection(row: &PgRow) -> Result<FutureProjection, PersistenceError> {
    let id: uuid::Uuid = column(row, "id")?;
    let revision: i32 = column(row, "revision")?;
    let previous_id: Option<uuid::Uuid> = column(row, "previous_id")?;
    let changes: Vec<FieldChange> = json_column(row, "changes")?;
    Ok(FutureProjection {
        id: ProjectionId::from_uuid(id),
        user_id: user_id(row)?,
        revision: i32_to_revision(revision)?,
        fields: json_column(row, "fields")?,
        previous_id: previous_id.map(ProjectionId::from_uuid),
        changes,
        created_at: timestamp(row, "created_at")?,
    })
}
