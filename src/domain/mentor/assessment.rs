//! Self-assessment answers captured before mentoring starts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::foundation::{AssessmentId, Timestamp, UserId};

/// A user's answer to one assessment question.
///
/// Some questions are free text; others (sliders, rankings, multi-select)
/// are stored as JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AnswerValue {
    Text(String),
    Structured(Value),
}

/// One question→answer pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentAnswer {
    pub question: String,
    pub answer: AnswerValue,
}

impl AssessmentAnswer {
    /// Creates a free-text answer.
    pub fn text(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: AnswerValue::Text(answer.into()),
        }
    }

    /// Creates a structured answer.
    pub fn structured(question: impl Into<String>, answer: Value) -> Self {
        Self {
            question: question.into(),
            answer: AnswerValue::Structured(answer),
        }
    }
}

/// The user's current self-assessment. Read-only for the mentor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub id: AssessmentId,
    pub user_id: UserId,
    pub answers: Vec<AssessmentAnswer>,
    pub taken_at: Timestamp,
}

impl Assessment {
    /// Creates an assessment with the given answers, taken now.
    pub fn new(user_id: UserId, answers: Vec<AssessmentAnswer>) -> Self {
        Self {
            id: AssessmentId::new(),
            user_id,
            answers,
            taken_at: Timestamp::now(),
        }
    }

    /// Returns true if this assessment was taken by `user_id`.
    pub fn belongs_to(&self, user_id: &UserId) -> bool {
        &self.user_id == user_id
    }
}
