//! Structural validation of model payloads.
//!
//! Checks run in a fixed order and every issue is collected; nothing stops at
//! the first failure. No range checks are made.

use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::record::{Payload, INT_FIELDS};

const REQUIRED_FIELDS: [&str; 3] = ["title", "summary", "rules_content"];

/// A problem found in a payload. Rendered as a stable snake_case code.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValidationIssue {
    /// Payload is absent, not an object, or empty
    PayloadMissingOrInvalid,
    /// Required text field absent or empty
    Missing(String),
    /// Neither `title_ja` nor `title_en`
    TitleTranslationMissing,
    /// Integer field holding something else
    NotInt(String),
}

impl ValidationIssue {
    /// Issue code, e.g. `summary_missing`.
    pub fn code(&self) -> String {
        match self {
            ValidationIssue::PayloadMissingOrInvalid => "payload_missing_or_invalid".to_string(),
            ValidationIssue::Missing(field) => format!("{field}_missing"),
            ValidationIssue::TitleTranslationMissing => "title_translation_missing".to_string(),
            ValidationIssue::NotInt(field) => format!("{field}_not_int"),
        }
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

impl Serialize for ValidationIssue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.code())
    }
}

fn has_text(payload: &Payload, key: &str) -> bool {
    payload
        .get(key)
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

/// Validate an optional payload.
pub fn validate(payload: Option<&Payload>) -> Vec<ValidationIssue> {
    let payload = match payload {
        Some(p) if !p.is_empty() => p,
        _ => return vec![ValidationIssue::PayloadMissingOrInvalid],
    };

    let mut issues = Vec::new();

    for field in REQUIRED_FIELDS {
        if !has_text(payload, field) {
            issues.push(ValidationIssue::Missing(field.to_string()));
        }
    }

    if !has_text(payload, "title_ja") && !has_text(payload, "title_en") {
        issues.push(ValidationIssue::TitleTranslationMissing);
    }

    for field in INT_FIELDS {
        match payload.get(field) {
            None | Some(Value::Null) => {}
            Some(Value::Number(n)) if n.is_i64() || n.is_u64() => {}
            Some(_) => issues.push(ValidationIssue::NotInt(field.to_string())),
        }
    }

    issues
}

/// Validate any JSON value; non-objects are invalid payloads.
pub fn validate_value(value: &Value) -> Vec<ValidationIssue> {
    validate(value.as_object())
}
