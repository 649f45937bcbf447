//! Table definitions as supplied by callers.
//!
//! A `TableSchema` names columns and keys by column name. The catalog
//! validates it and resolves names to positions (see `TableInfo`).
//! Schemas are serialised as JSON into the WAL's DDL records.

use serde::{Deserialize, Serialize};

use super::{StorageError, StorageResult};
use crate::executor::DataType;

/// A column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    /// Column name.
    pub name: String,
    /// Column type.
    pub data_type: DataType,
    /// Whether NULL is allowed.
    #[serde(default)]
    pub nullable: bool,
}

impl ColumnDef {
    /// Creates a non-nullable column.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
        }
    }

    /// Allows NULL in this column.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// What happens to referencing rows when a referenced key is deleted or
/// changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferentialAction {
    /// Reject the change while references exist.
    #[default]
    Restrict,
    /// Delete (or re-key) the referencing rows.
    Cascade,
    /// Null the referencing columns.
    SetNull,
}

/// A foreign key: referencing columns pointing at a key of another table
/// (or the same table).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Referencing columns.
    pub columns: Vec<String>,
    /// Referenced table.
    pub references_table: String,
    /// Referenced key columns: the primary key or a unique key.
    pub references_columns: Vec<String>,
    /// Action on delete of a referenced row.
    #[serde(default)]
    pub on_delete: ReferentialAction,
    /// Action on change of a referenced key.
    #[serde(default)]
    pub on_update: ReferentialAction,
}

impl ForeignKeyDef {
    /// Creates a restricting foreign key.
    pub fn new<S: Into<String>>(
        columns: impl IntoIterator<Item = S>,
        references_table: impl Into<String>,
        references_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            references_table: references_table.into(),
            references_columns: references_columns.into_iter().map(Into::into).collect(),
            on_delete: ReferentialAction::Restrict,
            on_update: ReferentialAction::Restrict,
        }
    }

    /// Sets the delete action.
    #[must_use]
    pub fn on_delete(mut self, action: ReferentialAction) -> Self {
        self.on_delete = action;
        self
    }

    /// Sets the update action.
    #[must_use]
    pub fn on_update(mut self, action: ReferentialAction) -> Self {
        self.on_update = action;
        self
    }
}

/// A table definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in order.
    pub columns: Vec<ColumnDef>,
    /// Primary key columns.
    pub primary_key: Vec<String>,
    /// Unique (candidate) keys.
    #[serde(default)]
    pub unique_keys: Vec<Vec<String>>,
    /// Foreign keys.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyDef>,
}

impl TableSchema {
    /// Starts a definition with no columns or keys.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            unique_keys: Vec::new(),
            foreign_keys: Vec::new(),
        }
    }

    /// Appends a column.
    #[must_use]
    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    /// Sets the primary key.
    #[must_use]
    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a unique key.
    #[must_use]
    pub fn unique<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.unique_keys
            .push(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a foreign key.
    #[must_use]
    pub fn foreign_key(mut self, foreign_key: ForeignKeyDef) -> Self {
        self.foreign_keys.push(foreign_key);
        self
    }

    /// Returns the position of a column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Returns the column names in order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Serialises the schema for the log.
    pub fn to_json(&self) -> StorageResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// Parses a schema written by [`TableSchema::to_json`].
    pub fn from_json(bytes: &[u8]) -> StorageResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::Encoding(e.to_string()))
    }
}
