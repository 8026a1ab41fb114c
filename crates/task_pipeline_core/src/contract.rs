use std::fmt;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

pub const TITLE_MAX_CHARS: usize = 100;
pub const DETAIL_MAX_CHARS: usize = 1_000;
pub const DEFAULT_MAX_IMPORT_ROWS: usize = 500;

pub const TASK_CREATE_EVENT_TYPE: &str = "TaskCreateRequested";
pub const EVENT_TYPE_ATTRIBUTE: &str = "eventType";
pub const IDEMPOTENCY_KEY_ATTRIBUTE: &str = "idempotencyKey";

/// A stored task as seen by callers. The internal storage key never appears
/// here; `id` is the bare identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Payload for direct creation and for fan-out message bodies.
///
/// `title` defaults to empty on decode so that a missing title is reported as
/// a field violation rather than a parse failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
    #[serde(default)]
    pub is_complete: bool,
}

/// Full replacement of a task's mutable fields. An absent `detail` or
/// `due_at` removes that field from the stored record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: String,
    pub is_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldViolation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row: Option<usize>,
    pub field: String,
    pub message: String,
}

impl FieldViolation {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            row: None,
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn at_row(mut self, row: usize) -> Self {
        self.row = Some(row);
        self
    }
}

impl fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.row {
            Some(row) => write!(f, "row {row}, {}: {}", self.field, self.message),
            None => write!(f, "{}: {}", self.field, self.message),
        }
    }
}

/// One or more schema violations. Never empty when constructed through the
/// validators in this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", render_violations(.violations))]
pub struct ValidationError {
    violations: Vec<FieldViolation>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            violations: vec![FieldViolation::new(field, message)],
        }
    }

    pub fn from_violations(violations: Vec<FieldViolation>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.violations
    }

    pub fn into_violations(self) -> Vec<FieldViolation> {
        self.violations
    }
}

fn render_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn validate_create_request(request: &CreateTaskRequest) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    collect_field_violations(
        &request.title,
        request.detail.as_deref(),
        request.due_at.as_deref(),
        &mut violations,
    );
    into_result(violations)
}

pub fn validate_update_request(request: &UpdateTaskRequest) -> Result<(), ValidationError> {
    let mut violations = Vec::new();
    collect_field_violations(
        &request.title,
        request.detail.as_deref(),
        request.due_at.as_deref(),
        &mut violations,
    );
    into_result(violations)
}

pub(crate) fn collect_field_violations(
    title: &str,
    detail: Option<&str>,
    due_at: Option<&str>,
    violations: &mut Vec<FieldViolation>,
) {
    if title.is_empty() {
        violations.push(FieldViolation::new("title", "required"));
    } else if title.chars().count() > TITLE_MAX_CHARS {
        violations.push(FieldViolation::new(
            "title",
            format!("must be at most {TITLE_MAX_CHARS} characters"),
        ));
    }

    if let Some(detail) = detail {
        if detail.chars().count() > DETAIL_MAX_CHARS {
            violations.push(FieldViolation::new(
                "detail",
                format!("must be at most {DETAIL_MAX_CHARS} characters"),
            ));
        }
    }

    if let Some(due_at) = due_at {
        if DateTime::parse_from_rfc3339(due_at).is_err() {
            violations.push(FieldViolation::new(
                "dueAt",
                "must be an ISO-8601 timestamp",
            ));
        }
    }
}

fn into_result(violations: Vec<FieldViolation>) -> Result<(), ValidationError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::from_violations(violations))
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn request(title: &str) -> CreateTaskRequest {
        CreateTaskRequest {
            title: title.to_string(),
            ..CreateTaskRequest::default()
        }
    }

    #[test]
    fn create_request_defaults_is_complete_to_false() {
        let parsed: CreateTaskRequest =
            serde_json::from_str(r#"{"title":"Buy milk"}"#).expect("payload should parse");
        assert_eq!(parsed, request("Buy milk"));
        assert!(!parsed.is_complete);
    }

    #[test]
    fn create_request_serializes_without_absent_optionals() {
        let body = serde_json::to_string(&request("Buy milk")).expect("request should serialize");
        assert_eq!(body, r#"{"title":"Buy milk","isComplete":false}"#);
    }

    #[test]
    fn missing_title_is_a_field_violation() {
        let error = validate_create_request(&request("")).expect_err("title is required");
        assert_eq!(error.violations(), &[FieldViolation::new("title", "required")]);
        assert_eq!(error.to_string(), "title: required");
    }

    #[test]
    fn title_length_counts_characters_not_bytes() {
        let at_limit = "é".repeat(TITLE_MAX_CHARS);
        assert!(validate_create_request(&request(&at_limit)).is_ok());

        let over_limit = "a".repeat(TITLE_MAX_CHARS + 1);
        let error = validate_create_request(&request(&over_limit)).expect_err("too long");
        assert_eq!(error.violations()[0].field, "title");
    }

    #[test]
    fn collects_every_violation_in_one_pass() {
        let payload = CreateTaskRequest {
            title: String::new(),
            detail: Some("x".repeat(DETAIL_MAX_CHARS + 1)),
            due_at: Some("next tuesday".to_string()),
            is_complete: false,
        };

        let error = validate_create_request(&payload).expect_err("payload should fail");
        let fields: Vec<&str> = error
            .violations()
            .iter()
            .map(|violation| violation.field.as_str())
            .collect();
        assert_eq!(fields, vec!["title", "detail", "dueAt"]);
    }

    #[test]
    fn accepts_rfc3339_due_at() {
        let payload = CreateTaskRequest {
            due_at: Some("2020-01-01T00:00:00Z".to_string()),
            ..request("Ship it")
        };
        assert!(validate_create_request(&payload).is_ok());
    }

    #[test]
    fn update_request_requires_is_complete_on_decode() {
        let error = serde_json::from_str::<UpdateTaskRequest>(r#"{"title":"x"}"#)
            .expect_err("isComplete is required");
        assert!(error.to_string().contains("isComplete"));
    }

    #[test]
    fn row_violation_display_includes_row_number() {
        let violation = FieldViolation::new("title", "required").at_row(3);
        assert_eq!(violation.to_string(), "row 3, title: required");
    }
}
