//! Trigger conditions: `{field, operator, value}` triples, AND-combined.

use core::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::EventData;

/// Comparison operator of a condition.
///
/// Operators outside the known set are kept (so stored rules round-trip) and
/// always evaluate to `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::Unknown(other) => other,
        }
    }
}

impl From<String> for Operator {
    fn from(value: String) -> Self {
        match value.as_str() {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            _ => Operator::Unknown(value),
        }
    }
}

impl From<Operator> for String {
    fn from(value: Operator) -> Self {
        value.as_str().to_string()
    }
}

/// A single condition evaluated against event data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: JsonValue,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Evaluate this condition against event data.
    ///
    /// `contains` requires the event field to be a string or an array; anything
    /// else is an evaluation error rather than a non-match.
    pub fn evaluate(&self, data: &EventData) -> Result<bool, ConditionError> {
        let actual = data.get(&self.field);

        let matched = match &self.operator {
            Operator::Equals => actual.is_some_and(|a| loosely_equal(a, &self.value)),
            Operator::NotEquals => !actual.is_some_and(|a| loosely_equal(a, &self.value)),
            Operator::Contains => contains(&self.field, actual, &self.value)?,
            Operator::GreaterThan => {
                actual.and_then(|a| compare(a, &self.value)) == Some(Ordering::Greater)
            }
            Operator::LessThan => actual.and_then(|a| compare(a, &self.value)) == Some(Ordering::Less),
            Operator::Unknown(_) => false,
        };

        Ok(matched)
    }
}

/// Condition evaluation failure. The owning automation is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConditionError {
    #[error("field `{field}` does not support `contains` (found {found})")]
    NotAContainer { field: String, found: &'static str },
}

/// AND of all conditions, short-circuiting on the first `false`.
///
/// An empty list always matches.
pub fn evaluate_conditions(conditions: &[Condition], data: &EventData) -> Result<bool, ConditionError> {
    for condition in conditions {
        if !condition.evaluate(data)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Strict equality, except that numbers compare by numeric value (`10 == 10.0`).
fn loosely_equal(a: &JsonValue, b: &JsonValue) -> bool {
    match (a, b) {
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn contains(field: &str, actual: Option<&JsonValue>, needle: &JsonValue) -> Result<bool, ConditionError> {
    match actual {
        Some(JsonValue::String(haystack)) => {
            let needle = match needle {
                JsonValue::String(s) => s.clone(),
                other => other.to_string(),
            };
            Ok(haystack.contains(&needle))
        }
        Some(JsonValue::Array(items)) => Ok(items.iter().any(|item| loosely_equal(item, needle))),
        other => Err(ConditionError::NotAContainer {
            field: field.to_string(),
            found: kind_of(other),
        }),
    }
}

/// Ordering for `greater_than` / `less_than`.
///
/// Numbers compare numerically, strings lexicographically, and a numeric string
/// compares against a number by its parsed value. Anything else is incomparable.
fn compare(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        _ => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

fn as_number(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn kind_of(value: Option<&JsonValue>) -> &'static str {
    match value {
        None => "nothing",
        Some(JsonValue::Null) => "null",
        Some(JsonValue::Bool(_)) => "a boolean",
        Some(JsonValue::Number(_)) => "a number",
        Some(JsonValue::String(_)) => "a string",
        Some(JsonValue::Array(_)) => "an array",
        Some(JsonValue::Object(_)) => "an object",
    }
}
