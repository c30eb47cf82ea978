//! Symbolic parameter values.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value in the symbolic (caller-facing) domain of a parameter.
///
/// Instruments speak text; callers speak numbers, symbols and traces. Every
/// decoded reply and every argument to `set` is one of these variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Integer settings (point counts, averaging, on/off codes).
    Int(i64),
    /// Floating point settings and readings.
    Float(f64),
    /// Symbols of enum-mapped parameters and free-form replies.
    Text(String),
    /// Traces and multi-field numeric readings.
    Array(Vec<f64>),
}

impl Value {
    /// Numeric view of scalar values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Text(_) | Value::Array(_) => None,
        }
    }

    /// Integer view; floats are accepted only when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Symbol view of text values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Sequence view of array values.
    pub fn as_array(&self) -> Option<&[f64]> {
        match self {
            Value::Array(v) => Some(v),
            _ => None,
        }
    }

    /// `true` for a floating point NaN, the log-sampling sentinel.
    pub fn is_nan(&self) -> bool {
        matches!(self, Value::Float(v) if v.is_nan())
    }

    /// Loose equality used by enum validators: numbers compare numerically
    /// across `Int`/`Float`, everything else structurally.
    pub fn matches(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Array(v) => write!(f, "[{} points]", v.len()),
        }
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(i64::from(value))
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<Vec<f64>> for Value {
    fn from(value: Vec<f64>) -> Self {
        Value::Array(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_views() {
        assert_eq!(Value::Int(3).as_f64(), Some(3.0));
        assert_eq!(Value::Float(4.0).as_i64(), Some(4));
        assert_eq!(Value::Float(4.5).as_i64(), None);
        assert_eq!(Value::from("ON").as_f64(), None);
    }

    #[test]
    fn test_loose_match() {
        assert!(Value::Int(6).matches(&Value::Float(6.0)));
        assert!(!Value::from("6").matches(&Value::Int(6)));
    }

    #[test]
    fn test_serializes_untagged() {
        let json = serde_json::to_string(&Value::Array(vec![1.0, 2.5])).unwrap();
        assert_eq!(json, "[1.0,2.5]");
        assert_eq!(serde_json::to_string(&Value::from("AC")).unwrap(), "\"AC\"");
    }
}
