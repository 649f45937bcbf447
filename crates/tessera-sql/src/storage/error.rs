//! Storage error types.

use thiserror::Error;

use tessera_common::RowId;
use tessera_txn::TransactionError;

use crate::executor::DataType;

/// Errors raised while defining or dropping tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A table with this name already exists.
    #[error("table already exists: {0}")]
    DuplicateTable(String),

    /// The table definition is malformed.
    #[error("invalid schema for table {table}: {reason}")]
    InvalidSchema {
        /// Table being defined.
        table: String,
        /// What is wrong.
        reason: String,
    },

    /// The table is referenced by another table's foreign key.
    #[error("table {table} is referenced by foreign keys of {}", referenced_by.join(", "))]
    ReferencedByForeignKey {
        /// Table being dropped.
        table: String,
        /// Referencing tables.
        referenced_by: Vec<String>,
    },
}

impl SchemaError {
    pub(crate) fn invalid(table: &str, reason: impl Into<String>) -> Self {
        SchemaError::InvalidSchema {
            table: table.to_string(),
            reason: reason.into(),
        }
    }
}

/// A rejected write. Only the offending statement fails; the transaction
/// stays active.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    /// The row has the wrong number of values.
    #[error("table {table} has {expected} columns, got {found} values")]
    ColumnCount {
        /// Table written.
        table: String,
        /// Declared columns.
        expected: usize,
        /// Values supplied.
        found: usize,
    },

    /// A value does not match its column's type.
    #[error("column {table}.{column} expects {expected}, got {found}")]
    TypeMismatch {
        /// Table written.
        table: String,
        /// Offending column.
        column: String,
        /// Declared type.
        expected: DataType,
        /// Supplied value.
        found: String,
    },

    /// NULL in a non-nullable column.
    #[error("column {table}.{column} may not be null")]
    NotNull {
        /// Table written.
        table: String,
        /// Offending column.
        column: String,
    },

    /// Duplicate primary key.
    #[error("duplicate primary key {key} in table {table}")]
    PrimaryKey {
        /// Table written.
        table: String,
        /// Key values.
        key: String,
    },

    /// Duplicate unique key.
    #[error("duplicate key {key} for unique ({}) in table {table}", columns.join(", "))]
    Unique {
        /// Table written.
        table: String,
        /// Key columns.
        columns: Vec<String>,
        /// Key values.
        key: String,
    },

    /// A foreign key check failed: a missing parent, or a restricted delete
    /// or update of a referenced key.
    #[error("foreign key {table}({}) -> {references}: {detail}", columns.join(", "))]
    ForeignKey {
        /// Referencing table.
        table: String,
        /// Referencing columns.
        columns: Vec<String>,
        /// Referenced table.
        references: String,
        /// What failed.
        detail: String,
    },

    /// A cascade came back to a row already on its path.
    #[error("cyclic cascade through {table} row {row_id}")]
    CyclicCascade {
        /// Table of the revisited row.
        table: String,
        /// Revisited row.
        row_id: RowId,
    },
}

/// Storage error type.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Table definition failed.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Table not found.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Column not found.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// The row does not exist in the transaction's view.
    #[error("row {row_id} not found in table {table}")]
    RowNotFound {
        /// Table addressed.
        table: String,
        /// Row addressed.
        row_id: RowId,
    },

    /// A constraint rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(#[from] ConstraintViolation),

    /// A predicate does not fit the table.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A join request is malformed.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// Transaction layer failure (locks, state, commit).
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Row image encoding or decoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Internal invariant broken.
    #[error("internal storage error: {0}")]
    Internal(String),
}

impl StorageError {
    /// Returns true if this is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, StorageError::Constraint(_))
    }
}

/// Storage result type.
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = StorageError::from(SchemaError::ReferencedByForeignKey {
            table: "customers".into(),
            referenced_by: vec!["orders".into(), "invoices".into()],
        });
        assert_eq!(
            err.to_string(),
            "table customers is referenced by foreign keys of orders, invoices"
        );

        let err = StorageError::from(ConstraintViolation::Unique {
            table: "users".into(),
            columns: vec!["email".into()],
            key: "(a@b)".into(),
        });
        assert!(err.is_constraint_violation());
        assert_eq!(
            err.to_string(),
            "constraint violation: duplicate key (a@b) for unique (email) in table users"
        );
    }
}
