//! Row representation.
//!
//! A stored row carries the `RowId` the storage engine assigned to it.
//! Rows produced by a join are derived data and carry no id.

use std::fmt;

use tessera_common::RowId;

use super::Value;

/// A single row of values.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Row {
    id: Option<RowId>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a row without an id.
    pub fn new(values: Vec<Value>) -> Self {
        Self { id: None, values }
    }

    /// Creates a row tagged with its storage id.
    pub fn with_id(id: RowId, values: Vec<Value>) -> Self {
        Self {
            id: Some(id),
            values,
        }
    }

    /// Creates a row with all NULL values.
    pub fn nulls(num_columns: usize) -> Self {
        Self::new(vec![Value::Null; num_columns])
    }

    /// Returns the storage id, if this row came straight from a table.
    pub fn id(&self) -> Option<RowId> {
        self.id
    }

    /// Returns the number of columns in this row.
    pub fn num_columns(&self) -> usize {
        self.values.len()
    }

    /// Returns true if this row has no columns.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the value at the given index.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Returns the values as a slice.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Consumes the row and returns its values.
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Returns an iterator over the values.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.values.iter()
    }

    /// Projects this row onto the given column indices. The id is kept.
    pub fn project(&self, indices: &[usize]) -> Row {
        Row {
            id: self.id,
            values: indices
                .iter()
                .map(|&i| self.values.get(i).cloned().unwrap_or(Value::Null))
                .collect(),
        }
    }

    /// Concatenates two rows. The result has no id.
    pub fn concat(&self, other: &Row) -> Row {
        let mut values = Vec::with_capacity(self.values.len() + other.values.len());
        values.extend(self.values.iter().cloned());
        values.extend(other.values.iter().cloned());
        Row::new(values)
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

impl From<Vec<Value>> for Row {
    fn from(values: Vec<Value>) -> Self {
        Self::new(values)
    }
}
