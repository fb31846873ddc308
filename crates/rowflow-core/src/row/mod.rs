//! Row model: fixed-schema tuples and their layout descriptions.
//!
//! A [`Row`] is an immutable, reference-counted tuple of [`Value`]s, so
//! handing the same row to several output channels never copies field data.
//! [`RowMeta`] describes the field layout a stage emits and is used when
//! resolving partitioning key columns at prepare time.

mod value;

pub use value::{Value, ValueType};

use std::fmt;
use std::sync::Arc;

/// Name and type of a single row field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueMeta {
    /// Field name, unique within a row layout.
    pub name: String,
    /// Declared field type.
    pub value_type: ValueType,
}

impl ValueMeta {
    /// Creates a field description.
    #[must_use]
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
        }
    }
}

/// Ordered field layout of the rows on a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowMeta {
    fields: Vec<ValueMeta>,
}

impl RowMeta {
    /// Creates an empty layout.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value_type: ValueType) -> Self {
        self.fields.push(ValueMeta::new(name, value_type));
        self
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the layout has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Position of the named field.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Field description at `index`.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&ValueMeta> {
        self.fields.get(index)
    }

    /// All fields in order.
    #[must_use]
    pub fn fields(&self) -> &[ValueMeta] {
        &self.fields
    }
}

impl FromIterator<ValueMeta> for RowMeta {
    fn from_iter<I: IntoIterator<Item = ValueMeta>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// An immutable tuple of field values.
#[derive(Clone, PartialEq)]
pub struct Row(Arc<[Value]>);

impl Row {
    /// Creates a row from its values.
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values.into())
    }

    /// Number of fields in the row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the row has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Value at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index)
    }

    /// All values in order.
    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    /// Returns a new row with `value` appended.
    #[must_use]
    pub fn extended(&self, value: Value) -> Self {
        let mut values = self.0.to_vec();
        values.push(value);
        Self::new(values)
    }
}

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}

impl FromIterator<Value> for Row {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
