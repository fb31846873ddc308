//! Field values carried inside rows.

use std::fmt;
use std::sync::Arc;

/// Declared type of a row field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// 64-bit signed integer.
    Integer,
    /// 64-bit floating point number.
    Number,
    /// UTF-8 text.
    String,
    /// Boolean flag.
    Boolean,
    /// Calendar date as milliseconds since the Unix epoch.
    Date,
    /// Point in time as nanoseconds since the Unix epoch.
    Timestamp,
    /// Raw bytes.
    Binary,
    /// Opaque serialized object. Cannot be used as a partitioning key.
    Serializable,
}

impl ValueType {
    /// Returns true for integer and floating point types.
    #[must_use]
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Number)
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Integer => "Integer",
            Self::Number => "Number",
            Self::String => "String",
            Self::Boolean => "Boolean",
            Self::Date => "Date",
            Self::Timestamp => "Timestamp",
            Self::Binary => "Binary",
            Self::Serializable => "Serializable",
        };
        f.write_str(name)
    }
}

/// A single field value.
///
/// Cloning is cheap for the fixed-width variants. Text, binary and opaque
/// payloads are cloned by value (`String`) or by reference count.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing value.
    Null,
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Number(f64),
    /// Text value.
    String(String),
    /// Boolean value.
    Boolean(bool),
    /// Milliseconds since the Unix epoch.
    Date(i64),
    /// Nanoseconds since the Unix epoch.
    Timestamp(i64),
    /// Raw bytes.
    Binary(Arc<[u8]>),
    /// Opaque serialized payload.
    Serializable(Arc<[u8]>),
}

impl Value {
    /// Returns the type of this value, or `None` for `Null`.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Self::Null => None,
            Self::Integer(_) => Some(ValueType::Integer),
            Self::Number(_) => Some(ValueType::Number),
            Self::String(_) => Some(ValueType::String),
            Self::Boolean(_) => Some(ValueType::Boolean),
            Self::Date(_) => Some(ValueType::Date),
            Self::Timestamp(_) => Some(ValueType::Timestamp),
            Self::Binary(_) => Some(ValueType::Binary),
            Self::Serializable(_) => Some(ValueType::Serializable),
        }
    }

    /// Returns true if this is `Null`.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer view of numeric and temporal values.
    ///
    /// Floating point values are truncated toward zero.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) | Self::Date(v) | Self::Timestamp(v) => Some(*v),
            Self::Number(v) => Some(*v as i64),
            _ => None,
        }
    }

    /// Returns the text payload of a `String` value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Integer(v) | Self::Date(v) | Self::Timestamp(v) => write!(f, "{v}"),
            Self::Number(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Binary(bytes) | Self::Serializable(bytes) => {
                write!(f, "<{} bytes>", bytes.len())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Number(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v.into())
    }
}
