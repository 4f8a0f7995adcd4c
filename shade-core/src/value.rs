//! Dynamic values flowing through dispatch
//!
//! Arguments, return values and field contents of framework objects are all
//! [`Value`]s. Objects compare by identity, never by content.

use crate::object::ObjectRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of a parameter, return value or field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeDesc {
    Void,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Object,
    Array,
}

impl TypeDesc {
    /// JVM-style descriptor character(s), used in signatures and logs
    pub fn descriptor(&self) -> &'static str {
        match self {
            TypeDesc::Void => "V",
            TypeDesc::Boolean => "Z",
            TypeDesc::Int => "I",
            TypeDesc::Long => "J",
            TypeDesc::Float => "F",
            TypeDesc::Double => "D",
            TypeDesc::String => "Ljava/lang/String;",
            TypeDesc::Object => "Ljava/lang/Object;",
            TypeDesc::Array => "[",
        }
    }

    /// The zero value: what an uninitialised field holds and what an
    /// unshadowed native method returns.
    pub fn default_value(&self) -> Value {
        match self {
            TypeDesc::Void => Value::Void,
            TypeDesc::Boolean => Value::Bool(false),
            TypeDesc::Int => Value::Int(0),
            TypeDesc::Long => Value::Long(0),
            TypeDesc::Float => Value::Float(0.0),
            TypeDesc::Double => Value::Double(0.0),
            TypeDesc::String | TypeDesc::Object | TypeDesc::Array => Value::Null,
        }
    }

    /// Whether a value may be passed where this type is declared
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (TypeDesc::Void, _) => false,
            (TypeDesc::Boolean, Value::Bool(_)) => true,
            (TypeDesc::Int, Value::Int(_)) => true,
            (TypeDesc::Long, Value::Int(_) | Value::Long(_)) => true,
            (TypeDesc::Float, Value::Int(_) | Value::Float(_)) => true,
            (TypeDesc::Double, Value::Int(_) | Value::Long(_) | Value::Float(_) | Value::Double(_)) => {
                true
            }
            (TypeDesc::String, Value::Str(_) | Value::Null) => true,
            (TypeDesc::Array, Value::Array(_) | Value::Null) => true,
            (TypeDesc::Object, Value::Void) => false,
            (TypeDesc::Object, _) => true,
            _ => false,
        }
    }
}

/// A dynamically typed value
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Void,
    Null,
    Bool(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Object(ObjectRef),
    Array(Vec<Value>),
}

impl Value {
    pub fn type_desc(&self) -> TypeDesc {
        match self {
            Value::Void => TypeDesc::Void,
            Value::Null | Value::Object(_) => TypeDesc::Object,
            Value::Bool(_) => TypeDesc::Boolean,
            Value::Int(_) => TypeDesc::Int,
            Value::Long(_) => TypeDesc::Long,
            Value::Float(_) => TypeDesc::Float,
            Value::Double(_) => TypeDesc::Double,
            Value::Str(_) => TypeDesc::String,
            Value::Array(_) => TypeDesc::Array,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Widening conversion from `int` or `long`
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(i64::from(*i)),
            Value::Long(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f32),
            _ => None,
        }
    }

    /// Widening conversion from any numeric value
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(f64::from(*i)),
            Value::Long(l) => Some(*l as f64),
            Value::Float(f) => Some(f64::from(*f)),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Long(a), Value::Long(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Long(l) => write!(f, "{}L", l),
            Value::Float(v) => write!(f, "{}f", v),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{}", o),
            Value::Array(items) => write!(f, "[{} items]", items.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
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

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<Option<ObjectRef>> for Value {
    fn from(v: Option<ObjectRef>) -> Self {
        v.map_or(Value::Null, Value::Object)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(TypeDesc::Int.default_value(), Value::Int(0));
        assert_eq!(TypeDesc::Boolean.default_value(), Value::Bool(false));
        assert_eq!(TypeDesc::String.default_value(), Value::Null);
        assert_eq!(TypeDesc::Void.default_value(), Value::Void);
    }

    #[test]
    fn test_accepts_widening() {
        assert!(TypeDesc::Long.accepts(&Value::Int(3)));
        assert!(TypeDesc::Double.accepts(&Value::Float(1.5)));
        assert!(!TypeDesc::Int.accepts(&Value::Long(3)));
        assert!(TypeDesc::String.accepts(&Value::Null));
        assert!(!TypeDesc::Boolean.accepts(&Value::Null));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(Value::from(7).as_long(), Some(7));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::from(2.5f32).as_double(), Some(2.5));
        assert!(Value::from(None::<ObjectRef>).is_null());
    }
}
