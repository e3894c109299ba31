//! Lenient coercion of payload values.
//!
//! Payloads come from a visual editor and older saved documents, so the same
//! field may arrive as a bool, a number, or a string. Every handler that needs
//! a condition or a count goes through these helpers instead of matching on
//! `Value` itself.

use serde_json::Value;

/// Result of normalising a value into a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truthiness {
    Truthy,
    Falsy,
    /// `null`, arrays and objects cannot be read as a condition.
    Invalid,
}

impl Truthiness {
    /// Normalise `value`.
    ///
    /// - booleans map directly;
    /// - numbers are truthy when non-zero;
    /// - strings (trimmed, case-insensitive) are truthy for `true`, `yes` and
    ///   `1`; every other string is falsy, so an unrecognised answer takes the
    ///   "no" branch.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Bool(true) => Self::Truthy,
            Value::Bool(false) => Self::Falsy,
            Value::Number(n) => {
                if n.as_f64().is_some_and(|f| f != 0.0) {
                    Self::Truthy
                } else {
                    Self::Falsy
                }
            }
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Self::Truthy,
                _ => Self::Falsy,
            },
            Value::Null | Value::Array(_) | Value::Object(_) => Self::Invalid,
        }
    }

    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Truthy => Some(true),
            Self::Falsy => Some(false),
            Self::Invalid => None,
        }
    }
}

/// Read a non-negative integer from a number or a numeric string.
///
/// Fractional numbers are truncated. Negative values, non-numeric strings and
/// every other shape yield `None` so the caller can fall back to its default.
pub fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<u64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|f| *f >= 0.0).map(|f| f as u64))
        }
        _ => None,
    }
}

/// Render a payload value as plain text: strings verbatim, everything else as
/// compact JSON, `null` as the empty string.
pub fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
