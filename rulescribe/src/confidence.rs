//! Per-field confidence and the protected-field set.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::record::GENERATED_FIELDS;

/// Confidence per generated field, each within [0, 1].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldConfidence(BTreeMap<String, f64>);

/// Coerce one raw confidence value. Anything unusable is 0.
fn coerce(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(v) if v.is_finite() => v.clamp(0.0, 1.0),
        _ => 0.0,
    }
}

impl FieldConfidence {
    /// Normalize a raw `data_confidence` value.
    ///
    /// Every generated field gets an entry. Non-object input yields all
    /// zeros.
    pub fn from_raw(raw: Option<&Value>) -> Self {
        let object = raw.and_then(Value::as_object);
        Self(
            GENERATED_FIELDS
                .iter()
                .map(|field| {
                    let value = object.and_then(|o| o.get(*field));
                    (field.to_string(), coerce(value))
                })
                .collect(),
        )
    }

    pub fn get(&self, field: &str) -> f64 {
        self.0.get(field).copied().unwrap_or(0.0)
    }

    /// Fields at or above `threshold`, in field-name order.
    pub fn protected_fields(&self, threshold: f64) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, v)| **v >= threshold)
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
