//! Daily plans: day-scoped action items emitted by the mentor.
//!
//! Plans are never edited in place. Each change produces a new plan that
//! supersedes the previous active one, which stays in storage as history.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::foundation::{PlanId, Timestamp, UserId};

/// Lifecycle of a plan revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// The single authoritative plan for the user.
    Active,
    /// Replaced by a newer plan; kept for history.
    Superseded,
}

/// Structured change to the active plan requested by the model.
///
/// `items` replaces the whole item list when present. Every other
/// permitted field is a free-text value keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
}

impl PlanDelta {
    /// Creates a delta that replaces the item list.
    pub fn with_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            items: Some(items.into_iter().map(Into::into).collect()),
            fields: BTreeMap::new(),
        }
    }

    /// Adds a free-text field change.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns true if the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.items.is_none() && self.fields.is_empty()
    }
}

/// A day-scoped set of action items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyPlan {
    pub id: PlanId,
    pub user_id: UserId,
    pub plan_date: NaiveDate,
    pub items: Vec<String>,
    pub fields: BTreeMap<String, String>,
    pub status: PlanStatus,
    /// The plan this one replaced, if any.
    pub supersedes: Option<PlanId>,
    pub created_at: Timestamp,
}

impl DailyPlan {
    /// Builds the plan that replaces `previous` after applying `delta`.
    ///
    /// Fields the delta leaves out carry forward from `previous`. With no
    /// previous plan the delta alone defines the new one.
    pub fn supersede(
        previous: Option<&DailyPlan>,
        user_id: UserId,
        delta: &PlanDelta,
        created_at: Timestamp,
    ) -> Self {
        let items = match (&delta.items, previous) {
            (Some(items), _) => items.clone(),
            (None, Some(prev)) => prev.items.clone(),
            (None, None) => Vec::new(),
        };

        let mut fields = previous.map(|p| p.fields.clone()).unwrap_or_default();
        fields.extend(delta.fields.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            id: PlanId::new(),
            user_id,
            plan_date: created_at.date(),
            items,
            fields,
            status: PlanStatus::Active,
            supersedes: previous.map(|p| p.id),
            created_at,
        }
    }

    /// Returns true if this is the user's authoritative plan.
    pub fn is_active(&self) -> bool {
        self.status == PlanStatus::Active
    }

    /// Marks this plan as replaced.
    pub fn mark_superseded(&mut self) {
        self.status = PlanStatus::Superseded;
    }
}
