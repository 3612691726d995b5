//! Future projections: the long-horizon goals narrative.
//!
//! Every update writes a new revision with a strictly greater revision
//! number. The revision records the previous value of each field it
//! changed, so the history can be audited without diffing snapshots.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::foundation::{ProjectionId, Timestamp, UserId};

/// Structured change to the projection requested by the model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectionDelta {
    pub fields: BTreeMap<String, String>,
}

impl ProjectionDelta {
    /// Adds a field change.
    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns true if the delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One field's transition between two revisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub field: String,
    /// Value in the predecessor revision; `None` if the field is new.
    pub previous: Option<String>,
    pub current: String,
}

/// A revision of the user's future projection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FutureProjection {
    pub id: ProjectionId,
    pub user_id: UserId,
    /// Starts at 1 and increases by one per revision.
    pub revision: u32,
    pub fields: BTreeMap<String, String>,
    pub previous_id: Option<ProjectionId>,
    /// Fields this revision changed relative to its predecessor.
    pub changes: Vec<FieldChange>,
    pub created_at: Timestamp,
}

impl FutureProjection {
    /// Builds the revision that follows `previous` after applying `delta`.
    ///
    /// Values equal to the predecessor's are not recorded as changes.
    pub fn next_revision(
        previous: Option<&FutureProjection>,
        user_id: UserId,
        delta: &ProjectionDelta,
        created_at: Timestamp,
    ) -> Self {
        let mut fields = previous.map(|p| p.fields.clone()).unwrap_or_default();
        let mut changes = Vec::new();

        for (field, value) in &delta.fields {
            let prior = fields.insert(field.clone(), value.clone());
            if prior.as_deref() != Some(value.as_str()) {
                changes.push(FieldChange {
                    field: field.clone(),
                    previous: prior,
                    current: value.clone(),
                });
            }
        }

        Self {
            id: ProjectionId::new(),
            user_id,
            revision: previous.map_or(1, |p| p.revision + 1),
            fields,
            previous_id: previous.map(|p| p.id),
            changes,
            created_at,
        }
    }

    /// Reconstructs the predecessor's fields from this revision's changes.
    pub fn previous_fields(&self) -> BTreeMap<String, String> {
        let mut fields = self.fields.clone();
        for change in &self.changes {
            match &change.previous {
                Some(value) => {
                    fields.insert(change.field.clone(), value.clone());
                }
                None => {
                    fields.remove(&change.field);
                }
            }
        }
        fields
    }
}
