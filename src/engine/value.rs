use serde::{Deserialize, Serialize};
use std::fmt;

/// Absolute tolerance used whenever two floats are compared for equality.
pub const FLOAT_EPSILON: f64 = 1e-5;

/// A single cell of a table.
///
/// `Null` never appears in rows written by INSERT; it pads columns added by
/// ALTER TABLE and the missing side of outer joins.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(String),
    Float(f64),
    Null,
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Float(_) => "float",
            Value::Null => "null",
        }
    }

    /// Equality used by the join engine. Returns `None` when the two values
    /// do not share a runtime type.
    pub fn join_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Str(a), Value::Str(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some(float_eq(*a, *b)),
            // a padded cell joins with nothing
            (Value::Null, _) | (_, Value::Null) => Some(false),
            _ => None,
        }
    }
}

pub(crate) fn float_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < FLOAT_EPSILON
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(v) => f.write_str(v),
            Value::Float(v) => write!(f, "{v}"),
            Value::Null => f.write_str("NULL"),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_eq_requires_same_type() {
        assert_eq!(Value::Int(1).join_eq(&Value::Int(1)), Some(true));
        assert_eq!(Value::from("a").join_eq(&Value::from("b")), Some(false));
        assert_eq!(Value::Float(1.0).join_eq(&Value::Float(1.000001)), Some(true));
        assert_eq!(Value::Int(1).join_eq(&Value::from("1")), None);
        assert_eq!(Value::Null.join_eq(&Value::Int(1)), Some(false));
    }

    #[test]
    fn json_is_untagged() {
        let row = vec![Value::Int(3), Value::from("x"), Value::Null, Value::Bool(true)];
        assert_eq!(serde_json::to_string(&row).unwrap(), r#"[3,"x",null,true]"#);
    }
}
