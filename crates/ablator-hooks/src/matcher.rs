//! Partial structural matching for `whenInput` / `whenOutput`.

use serde_json::Value;

/// Whether `actual` contains `expected`.
///
/// - objects: every expected key exists in `actual` and its value matches recursively
/// - arrays: same length and elements match pairwise
/// - scalars: equality
#[must_use]
pub fn submatch(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(want), Value::Object(have)) => want
            .iter()
            .all(|(key, value)| have.get(key).is_some_and(|found| submatch(value, found))),
        (Value::Array(want), Value::Array(have)) => {
            want.len() == have.len() && want.iter().zip(have).all(|(w, h)| submatch(w, h))
        }
        (Value::Object(_) | Value::Array(_), _) => false,
        _ => expected == actual,
    }
}
