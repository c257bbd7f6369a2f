//! Value type definitions for the Vigil engine.
//!
//! This module defines the `Value` enum which represents any value that can
//! flow through a source collection, a transformation, or a result view.
//!
//! `Value` carries a *total* ordering (floats compare by IEEE total order,
//! numerically equal values of different variants tie-break by variant) so
//! that values can serve as sharing keys, projection keys, and extremum
//! comparer inputs without a partial-comparison escape hatch.

use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};

/// A value flowing through the engine.
#[derive(Clone, Debug)]
pub enum Value {
    /// Null value
    Null,
    /// Boolean value
    Boolean(bool),
    /// 64-bit signed integer
    Int64(i64),
    /// 64-bit floating point
    Float64(f64),
    /// UTF-8 string
    String(String),
    /// Ordered list; doubles as the tuple/record shape transformations
    /// index into and as the expansion payload for flatten operators
    List(Vec<Value>),
}

impl Value {
    /// Returns true if this value is Null.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns the boolean value if this is a Boolean, None otherwise.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the i64 value if this is an Int64, None otherwise.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the f64 value if this is a Float64, None otherwise.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the string slice if this is a String, None otherwise.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Returns the list items if this is a List, None otherwise.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    /// Returns true if this value is numeric (Int64 or Float64).
    #[inline]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_))
    }

    /// Returns the numeric value as f64 if this is Int64 or Float64.
    pub fn numeric(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric addition used by incremental sum maintenance.
    ///
    /// Int64 + Int64 stays integral while it fits; any float operand, or an
    /// integer overflow, promotes the result to Float64. Returns None when
    /// either operand is non-numeric.
    pub fn add_numeric(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => Some(match a.checked_add(*b) {
                Some(sum) => Value::Int64(sum),
                None => Value::Float64(*a as f64 + *b as f64),
            }),
            _ => Some(Value::Float64(self.numeric()? + other.numeric()?)),
        }
    }

    /// Numeric subtraction used by incremental sum maintenance.
    pub fn sub_numeric(&self, other: &Value) -> Option<Value> {
        match (self, other) {
            (Value::Int64(a), Value::Int64(b)) => Some(match a.checked_sub(*b) {
                Some(diff) => Value::Int64(diff),
                None => Value::Float64(*a as f64 - *b as f64),
            }),
            _ => Some(Value::Float64(self.numeric()? - other.numeric()?)),
        }
    }

    /// A short name for the value's shape, used in fault messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int64(_) => "int64",
            Value::Float64(_) => "float64",
            Value::String(_) => "string",
            Value::List(_) => "list",
        }
    }

    /// Rank used to order values of different variants.
    fn variant_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int64(_) => 2,
            Value::Float64(_) => 3,
            Value::String(_) => 4,
            Value::List(_) => 5,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            // Bit equality keeps Eq/Ord/Hash mutually consistent for floats.
            (Value::Float64(a), Value::Float64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.variant_rank().hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(v) => v.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
            Value::List(v) => v.hash(state),
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            // Mixed numerics compare numerically; numeric ties fall through
            // to variant rank so Ord stays consistent with Eq.
            (Value::Int64(a), Value::Float64(b)) => (*a as f64)
                .total_cmp(b)
                .then(self.variant_rank().cmp(&other.variant_rank())),
            (Value::Float64(a), Value::Int64(b)) => a
                .total_cmp(&(*b as f64))
                .then(self.variant_rank().cmp(&other.variant_rank())),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::List(a), Value::List(b)) => a.cmp(b),
            _ => self.variant_rank().cmp(&other.variant_rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Value) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}
