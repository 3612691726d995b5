//! Output schema - the contract model output must satisfy.
//!
//! Model output arrives as a [`RawOutput`] and is never read field by
//! field until [`OutputSchema::validate`] has turned it into a
//! [`MentorOutput`]. That is the only constructor of `MentorOutput`, so a
//! value of that type is proof the output passed validation.
//!
//! # Wire format
//!
//! ```json
//! {
//!   "reply": "Let's break this into steps.",
//!   "plan_delta": { "items": ["step1"], "focus": "momentum" },
//!   "projection_delta": { "vision": "..." }
//! }
//! ```
//!
//! `planDelta` and `projectionDelta` are accepted as aliases, but not
//! alongside their snake_case spelling. Any other top-level key is a
//! violation.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

use super::plan::PlanDelta;
use super::projection::ProjectionDelta;

/// Field name of the mentor's reply text.
pub const REPLY_FIELD: &str = "reply";
/// Field name of the optional plan delta.
pub const PLAN_DELTA_FIELD: &str = "plan_delta";
/// Field name of the optional projection delta.
pub const PROJECTION_DELTA_FIELD: &str = "projection_delta";
/// Plan field holding the list of action items.
pub const PLAN_ITEMS_FIELD: &str = "items";

/// Plan fields permitted when none are configured.
pub const DEFAULT_PLAN_FIELDS: &[&str] = &["items", "focus", "notes"];
/// Projection fields permitted when none are configured.
pub const DEFAULT_PROJECTION_FIELDS: &[&str] =
    &["vision", "one_year_goal", "five_year_goal", "milestones", "risks"];

/// Unvalidated output from the model gateway.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutput {
    /// The provider returned structured JSON directly.
    Json(Value),
    /// The provider returned text that should contain a JSON object.
    Text(String),
}

impl RawOutput {
    /// Renders the output as text for diagnostics.
    pub fn to_diagnostic_string(&self) -> String {
        match self {
            RawOutput::Json(value) => value.to_string(),
            RawOutput::Text(text) => text.clone(),
        }
    }
}

/// One reason model output failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutputViolation {
    #[error("the response is not a JSON object ({detail})")]
    NotAnObject { detail: String },

    #[error("required field `{field}` is missing")]
    MissingField { field: String },

    #[error("field `{field}` must be {expected}, but was {actual}")]
    InvalidType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("field `{field}` must not be empty or whitespace")]
    EmptyValue { field: String },

    #[error("field `{field}` must be at most {max} characters, but was {actual}")]
    TooLong {
        field: String,
        max: usize,
        actual: usize,
    },

    #[error("`{field}` is not a permitted field of `{section}` (allowed: {allowed})")]
    UnknownField {
        section: String,
        field: String,
        allowed: String,
    },

    #[error("`{field}` and `{alias}` were both given; send only `{field}`")]
    DuplicateField { field: String, alias: String },
}

impl OutputViolation {
    /// The field path the violation refers to, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            OutputViolation::NotAnObject { .. } => None,
            OutputViolation::MissingField { field }
            | OutputViolation::InvalidType { field, .. }
            | OutputViolation::EmptyValue { field }
            | OutputViolation::TooLong { field, .. }
            | OutputViolation::UnknownField { field, .. }
            | OutputViolation::DuplicateField { field, .. } => Some(field),
        }
    }
}

/// All violations found in one model output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct OutputValidationError {
    violations: Vec<OutputViolation>,
}

impl OutputValidationError {
    fn new(violations: Vec<OutputViolation>) -> Self {
        Self { violations }
    }

    /// The individual violations, in document order.
    pub fn violations(&self) -> &[OutputViolation] {
        &self.violations
    }
}

impl fmt::Display for OutputValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.violations.iter().map(ToString::to_string).collect();
        write!(f, "{}", rendered.join("; "))
    }
}

/// Model output that passed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentorOutput {
    reply: String,
    plan_delta: Option<PlanDelta>,
    projection_delta: Option<ProjectionDelta>,
}

impl MentorOutput {
    /// The mentor's reply, trimmed.
    pub fn reply(&self) -> &str {
        &self.reply
    }

    /// Requested plan change, if any.
    pub fn plan_delta(&self) -> Option<&PlanDelta> {
        self.plan_delta.as_ref()
    }

    /// Requested projection change, if any.
    pub fn projection_delta(&self) -> Option<&ProjectionDelta> {
        self.projection_delta.as_ref()
    }
}

/// Declarative description of valid model output.
///
/// The permitted delta fields are policy and come from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    plan_fields: BTreeSet<String>,
    projection_fields: BTreeSet<String>,
    max_reply_chars: Option<usize>,
}

impl Default for OutputSchema {
    fn default() -> Self {
        Self::new(
            DEFAULT_PLAN_FIELDS.iter().copied(),
            DEFAULT_PROJECTION_FIELDS.iter().copied(),
        )
    }
}

impl OutputSchema {
    /// Creates a schema permitting the given delta fields.
    pub fn new<P, Q, S, T>(plan_fields: P, projection_fields: Q) -> Self
    where
        P: IntoIterator<Item = S>,
        Q: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        Self {
            plan_fields: plan_fields.into_iter().map(Into::into).collect(),
            projection_fields: projection_fields.into_iter().map(Into::into).collect(),
            max_reply_chars: None,
        }
    }

    /// Caps the reply length, counted in characters.
    pub fn with_max_reply_chars(mut self, max: usize) -> Self {
        self.max_reply_chars = Some(max);
        self
    }

    /// Permitted plan delta fields.
    pub fn plan_fields(&self) -> &BTreeSet<String> {
        &self.plan_fields
    }

    /// Permitted projection delta fields.
    pub fn projection_fields(&self) -> &BTreeSet<String> {
        &self.projection_fields
    }

    /// JSON Schema document handed to the model gateway.
    pub fn describe(&self) -> Value {
        let plan_properties: Map<String, Value> = self
            .plan_fields
            .iter()
            .map(|field| {
                let schema = if field == PLAN_ITEMS_FIELD {
                    json!({ "type": "array", "items": { "type": "string", "minLength": 1 } })
                } else {
                    json!({ "type": "string", "minLength": 1 })
                };
                (field.clone(), schema)
            })
            .collect();

        let projection_properties: Map<String, Value> = self
            .projection_fields
            .iter()
            .map(|field| (field.clone(), json!({ "type": "string", "minLength": 1 })))
            .collect();

        let mut reply = json!({ "type": "string", "minLength": 1 });
        if let Some(max) = self.max_reply_chars {
            reply["maxLength"] = json!(max);
        }

        json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "type": "object",
            "required": [REPLY_FIELD],
            "additionalProperties": false,
            "properties": {
                REPLY_FIELD: reply,
                PLAN_DELTA_FIELD: {
                    "type": ["object", "null"],
                    "additionalProperties": false,
                    "properties": plan_properties,
                },
                PROJECTION_DELTA_FIELD: {
                    "type": ["object", "null"],
                    "additionalProperties": false,
                    "properties": projection_properties,
                },
            },
        })
    }

    /// Validates raw model output, collecting every violation.
    pub fn validate(&self, raw: &RawOutput) -> Result<MentorOutput, OutputValidationError> {
        let parsed;
        let value = match raw {
            RawOutput::Json(value) => value,
            RawOutput::Text(text) => {
                parsed = parse_json_text(text)
                    .map_err(|v| OutputValidationError::new(vec![v]))?;
                &parsed
            }
        };

        let obj = value.as_object().ok_or_else(|| {
            OutputValidationError::new(vec![OutputViolation::NotAnObject {
                detail: format!("got {}", type_name(value)),
            }])
        })?;

        let mut violations = Vec::new();

        for key in obj.keys() {
            if canonical_key(key).is_none() {
                violations.push(OutputViolation::UnknownField {
                    section: "root".to_string(),
                    field: key.clone(),
                    allowed: [REPLY_FIELD, PLAN_DELTA_FIELD, PROJECTION_DELTA_FIELD].join(", "),
                });
            }
        }

        let reply = self.validate_reply(obj.get(REPLY_FIELD), &mut violations);
        let plan_delta = self.validate_plan_delta(
            lookup(obj, PLAN_DELTA_FIELD, "planDelta", &mut violations),
            &mut violations,
        );
        let projection_delta = self.validate_projection_delta(
            lookup(obj, PROJECTION_DELTA_FIELD, "projectionDelta", &mut violations),
            &mut violations,
        );

        if !violations.is_empty() {
            return Err(OutputValidationError::new(violations));
        }

        match reply {
            Some(reply) => Ok(MentorOutput {
                reply,
                plan_delta: plan_delta.filter(|d| !d.is_empty()),
                projection_delta: projection_delta.filter(|d| !d.is_empty()),
            }),
            None => Err(OutputValidationError::new(vec![OutputViolation::MissingField {
                field: REPLY_FIELD.to_string(),
            }])),
        }
    }

    fn validate_reply(
        &self,
        value: Option<&Value>,
        violations: &mut Vec<OutputViolation>,
    ) -> Option<String> {
        let value = match value {
            Some(v) => v,
            None => {
                violations.push(OutputViolation::MissingField {
                    field: REPLY_FIELD.to_string(),
                });
                return None;
            }
        };

        let text = match value.as_str() {
            Some(text) => text.trim(),
            None => {
                violations.push(invalid_type(REPLY_FIELD, "a string", value));
                return None;
            }
        };

        if text.is_empty() {
            violations.push(OutputViolation::EmptyValue {
                field: REPLY_FIELD.to_string(),
            });
            return None;
        }

        if let Some(max) = self.max_reply_chars {
            let actual = text.chars().count();
            if actual > max {
                violations.push(OutputViolation::TooLong {
                    field: REPLY_FIELD.to_string(),
                    max,
                    actual,
                });
                return None;
            }
        }

        Some(text.to_string())
    }

    fn validate_plan_delta(
        &self,
        value: Option<&Value>,
        violations: &mut Vec<OutputViolation>,
    ) -> Option<PlanDelta> {
        let obj = delta_object(PLAN_DELTA_FIELD, value, violations)?;
        let before = violations.len();
        let mut delta = PlanDelta::default();

        for (key, field_value) in obj {
            let path = format!("{}.{}", PLAN_DELTA_FIELD, key);
            if !self.plan_fields.contains(key) {
                violations.push(unknown_field(PLAN_DELTA_FIELD, key, &self.plan_fields));
                continue;
            }

            if key == PLAN_ITEMS_FIELD {
                delta.items = string_list(&path, field_value, violations);
            } else if let Some(text) = non_empty_string(&path, field_value, violations) {
                delta.fields.insert(key.clone(), text);
            }
        }

        (violations.len() == before).then_some(delta)
    }

    fn validate_projection_delta(
        &self,
        value: Option<&Value>,
        violations: &mut Vec<OutputViolation>,
    ) -> Option<ProjectionDelta> {
        let obj = delta_object(PROJECTION_DELTA_FIELD, value, violations)?;
        let before = violations.len();
        let mut delta = ProjectionDelta::default();

        for (key, field_value) in obj {
            let path = format!("{}.{}", PROJECTION_DELTA_FIELD, key);
            if !self.projection_fields.contains(key) {
                violations.push(unknown_field(
                    PROJECTION_DELTA_FIELD,
                    key,
                    &self.projection_fields,
                ));
                continue;
            }
            if let Some(text) = non_empty_string(&path, field_value, violations) {
                delta.fields.insert(key.clone(), text);
            }
        }

        (violations.len() == before).then_some(delta)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Parses model text as JSON, tolerating a surrounding Markdown code fence.
fn parse_json_text(text: &str) -> Result<Value, OutputViolation> {
    let body = strip_code_fence(text.trim());
    serde_json::from_str(body).map_err(|e| OutputViolation::NotAnObject {
        detail: format!("invalid JSON: {}", e),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json") on the opening line.
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn canonical_key(key: &str) -> Option<&'static str> {
    match key {
        REPLY_FIELD => Some(REPLY_FIELD),
        PLAN_DELTA_FIELD | "planDelta" => Some(PLAN_DELTA_FIELD),
        PROJECTION_DELTA_FIELD | "projectionDelta" => Some(PROJECTION_DELTA_FIELD),
        _ => None,
    }
}

/// Reads `key`, falling back to its camelCase `alias`. Both present is a violation.
fn lookup<'a>(
    obj: &'a Map<String, Value>,
    key: &str,
    alias: &str,
    violations: &mut Vec<OutputViolation>,
) -> Option<&'a Value> {
    match (obj.get(key), obj.get(alias)) {
        (Some(_), Some(_)) => {
            violations.push(OutputViolation::DuplicateField {
                field: key.to_string(),
                alias: alias.to_string(),
            });
            None
        }
        (value, alias_value) => value.or(alias_value),
    }
}

/// Returns the delta's object, `None` for an absent or null delta.
fn delta_object<'a>(
    field: &str,
    value: Option<&'a Value>,
    violations: &mut Vec<OutputViolation>,
) -> Option<&'a Map<String, Value>> {
    match value {
        None | Some(Value::Null) => None,
        Some(Value::Object(obj)) => Some(obj),
        Some(other) => {
            violations.push(invalid_type(field, "an object or null", other));
            None
        }
    }
}

fn string_list(
    path: &str,
    value: &Value,
    violations: &mut Vec<OutputViolation>,
) -> Option<Vec<String>> {
    let Some(arr) = value.as_array() else {
        violations.push(invalid_type(path, "an array of strings", value));
        return None;
    };

    let before = violations.len();
    let items: Vec<String> = arr
        .iter()
        .enumerate()
        .filter_map(|(i, item)| non_empty_string(&format!("{}[{}]", path, i), item, violations))
        .collect();

    (violations.len() == before).then_some(items)
}

fn non_empty_string(
    path: &str,
    value: &Value,
    violations: &mut Vec<OutputViolation>,
) -> Option<String> {
    match value.as_str() {
        Some(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(_) => {
            violations.push(OutputViolation::EmptyValue {
                field: path.to_string(),
            });
            None
        }
        None => {
            violations.push(invalid_type(path, "a string", value));
            None
        }
    }
}

fn invalid_type(field: &str, expected: &str, actual: &Value) -> OutputViolation {
    OutputViolation::InvalidType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: type_name(actual).to_string(),
    }
}

fn unknown_field(section: &str, field: &str, allowed: &BTreeSet<String>) -> OutputViolation {
    OutputViolation::UnknownField {
        section: section.to_string(),
        field: format!("{}.{}", section, field),
        allowed: allowed.iter().cloned().collect::<Vec<_>>().join(", "),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mentor::CorrectiveInstruction;
    use proptest::prelude::*;

    fn validate(value: Value) -> Result<MentorOutput, OutputValidationError> {
        OutputSchema::default().validate(&RawOutput::Json(value))
    }

    #[test]
    fn reply_only_output_is_valid() {
        let output = validate(json!({ "reply": "Here's my advice." })).unwrap();
        assert_eq!(output.reply(), "Here's my advice.");
        assert!(output.plan_delta().is_none());
        assert!(output.projection_delta().is_none());
    }

    #[test]
    fn reply_is_trimmed() {
        let output = validate(json!({ "reply": "  spaced out \n" })).unwrap();
        assert_eq!(output.reply(), "spaced out");
    }

    #[test]
    fn empty_reply_is_rejected() {
        let err = validate(json!({ "reply": "" })).unwrap_err();
        assert_eq!(
            err.violations(),
            &[OutputViolation::EmptyValue {
                field: "reply".to_string()
            }]
        );
    }

    #[test]
    fn missing_reply_is_rejected() {
        let err = validate(json!({ "plan_delta": { "items": ["a"] } })).unwrap_err();
        assert!(err
            .violations()
            .iter()
            .any(|v| matches!(v, OutputViolation::MissingField { field } if field == "reply")));
    }

    #[test]
    fn non_string_reply_is_rejected() {
        let err = validate(json!({ "reply": 42 })).unwrap_err();
        assert!(matches!(
            &err.violations()[0],
            OutputViolation::InvalidType { field, actual, .. } if field == "reply" && actual == "a number"
        ));
    }

    #[test]
    fn non_object_is_rejected() {
        let err = validate(json!(["reply"])).unwrap_err();
        assert!(matches!(err.violations()[0], OutputViolation::NotAnObject { .. }));
    }

    #[test]
    fn plan_delta_is_parsed() {
        let output = validate(json!({
            "reply": "Let's break this into steps.",
            "planDelta": { "items": ["step1"], "focus": "momentum" }
        }))
        .unwrap();

        let delta = output.plan_delta().unwrap();
        assert_eq!(delta.items, Some(vec!["step1".to_string()]));
        assert_eq!(delta.fields.get("focus").map(String::as_str), Some("momentum"));
    }

    #[test]
    fn unknown_plan_field_is_rejected_with_path() {
        let err = validate(json!({
            "reply": "ok",
            "plan_delta": { "deadline": "friday" }
        }))
        .unwrap_err();

        assert_eq!(err.violations().len(), 1);
        assert_eq!(err.violations()[0].field(), Some("plan_delta.deadline"));
    }

    #[test]
    fn blank_plan_item_is_rejected_with_index() {
        let err = validate(json!({
            "reply": "ok",
            "plan_delta": { "items": ["fine", "  "] }
        }))
        .unwrap_err();
        assert_eq!(err.violations()[0].field(), Some("plan_delta.items[1]"));
    }

    #[test]
    fn projection_delta_must_use_known_fields() {
        let err = validate(json!({
            "reply": "ok",
            "projection_delta": { "vision": "teach", "salary": "more" }
        }))
        .unwrap_err();
        assert_eq!(err.violations()[0].field(), Some("projection_delta.salary"));
    }

    #[test]
    fn null_deltas_are_absent() {
        let output = validate(json!({
            "reply": "ok",
            "plan_delta": null,
            "projection_delta": {}
        }))
        .unwrap();
        assert!(output.plan_delta().is_none());
        assert!(output.projection_delta().is_none());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let err = validate(json!({ "reply": "ok", "reasoning": "..." })).unwrap_err();
        assert_eq!(err.violations()[0].field(), Some("reasoning"));
    }

    #[test]
    fn delta_given_under_both_spellings_is_rejected() {
        let err = validate(json!({
            "reply": "ok",
            "plan_delta": { "items": ["step1"] },
            "planDelta": { "deadline": "friday" }
        }))
        .unwrap_err();

        assert_eq!(
            err.violations(),
            &[OutputViolation::DuplicateField {
                field: "plan_delta".to_string(),
                alias: "planDelta".to_string(),
            }]
        );
        assert_eq!(err.violations()[0].field(), Some("plan_delta"));
        assert!(CorrectiveInstruction::from_violations(&err)
            .as_str()
            .contains("`plan_delta` and `planDelta` were both given"));
    }

    #[test]
    fn all_violations_are_collected() {
        let err = validate(json!({
            "reply": " ",
            "plan_delta": { "items": "not a list" },
            "projection_delta": { "vision": 3 }
        }))
        .unwrap_err();
        assert_eq!(err.violations().len(), 3);
        let rendered = err.to_string();
        assert!(rendered.contains("`reply`"));
        assert!(rendered.contains("`plan_delta.items`"));
        assert!(rendered.contains("`projection_delta.vision`"));
    }

    #[test]
    fn text_output_in_code_fence_is_parsed() {
        let raw = RawOutput::Text("```json\n{\"reply\": \"fenced\"}\n```".to_string());
        let output = OutputSchema::default().validate(&raw).unwrap();
        assert_eq!(output.reply(), "fenced");
    }

    #[test]
    fn unparseable_text_is_not_an_object() {
        let raw = RawOutput::Text("Sure! Here's some advice.".to_string());
        let err = OutputSchema::default().validate(&raw).unwrap_err();
        assert!(matches!(err.violations()[0], OutputViolation::NotAnObject { .. }));
    }

    #[test]
    fn max_reply_chars_is_enforced() {
        let schema = OutputSchema::default().with_max_reply_chars(5);
        let err = schema
            .validate(&RawOutput::Json(json!({ "reply": "too long" })))
            .unwrap_err();
        assert!(matches!(
            err.violations()[0],
            OutputViolation::TooLong { max: 5, actual: 8, .. }
        ));
    }

    #[test]
    fn configured_fields_replace_defaults() {
        let schema = OutputSchema::new(["items"], ["north_star"]);
        assert!(schema
            .validate(&RawOutput::Json(json!({
                "reply": "ok",
                "projection_delta": { "north_star": "lead a team" }
            })))
            .is_ok());
        assert!(schema
            .validate(&RawOutput::Json(json!({
                "reply": "ok",
                "projection_delta": { "vision": "x" }
            })))
            .is_err());
    }

    #[test]
    fn describe_lists_permitted_fields() {
        let doc = OutputSchema::default().with_max_reply_chars(2000).describe();
        assert_eq!(doc["required"], json!(["reply"]));
        assert_eq!(doc["properties"]["reply"]["maxLength"], json!(2000));
        assert_eq!(
            doc["properties"]["plan_delta"]["properties"]["items"]["type"],
            json!("array")
        );
        assert!(doc["properties"]["projection_delta"]["properties"]
            .get("vision")
            .is_some());
    }

    proptest! {
        #[test]
        fn whitespace_only_replies_never_validate(reply in "[ \t\n\r]{0,20}") {
            let value = json!({ "reply": reply });
            prop_assert!(validate(value).is_err());
        }

        #[test]
        fn non_blank_replies_validate_trimmed(reply in "[a-zA-Z0-9][a-zA-Z0-9 .,!?]{0,60}") {
            let output = validate(json!({ "reply": reply.clone() })).unwrap();
            prop_assert_eq!(output.reply(), reply.trim());
        }
    }
}
