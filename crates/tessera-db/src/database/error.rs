//! Database error types.

use std::io;

use thiserror::Error;

use tessera_common::{RowId, TxnId};
use tessera_sql::storage::{ConstraintViolation, SchemaError, StorageError};
use tessera_txn::{LockError, TransactionError, TransactionState};
use tessera_wal::WalError;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A table definition or removal was rejected.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// No table with this name.
    #[error("unknown table {0}")]
    UnknownTable(String),

    /// No column with this name.
    #[error("unknown column {0}")]
    UnknownColumn(String),

    /// The row does not exist in the transaction's view.
    #[error("row {row_id} not found in {table}")]
    RowNotFound {
        /// The table.
        table: String,
        /// The missing row.
        row_id: RowId,
    },

    /// A row operation was rejected; the transaction stays active.
    #[error(transparent)]
    ConstraintViolation(#[from] ConstraintViolation),

    /// Commit-time validation failed; the transaction was aborted.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// The log could not be written or synced; the transaction was aborted.
    #[error("durability failure: {0}")]
    DurabilityFailure(#[source] WalError),

    /// A row lock was not granted in time; the transaction stays active.
    #[error("lock timeout: {0}")]
    LockTimeout(#[source] LockError),

    /// Waiting for a row lock would deadlock; the transaction stays active.
    #[error("deadlock: {0}")]
    Deadlock(#[source] LockError),

    /// The transaction has already committed or aborted.
    #[error("transaction {txn_id} is not active ({state})")]
    TransactionNotActive {
        /// The transaction.
        txn_id: TxnId,
        /// Its terminal state.
        state: TransactionState,
    },

    /// No transaction with this id.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxnId),

    /// Too many transactions are running.
    #[error("too many concurrent transactions (limit {limit})")]
    TooManyTransactions {
        /// The configured limit.
        limit: usize,
    },

    /// A predicate does not fit the table.
    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A join request is malformed.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// The log is damaged beyond its tail.
    #[error("log corrupted: {0}")]
    Corruption(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DatabaseError {
    /// Returns true if retrying the operation (or the transaction) may
    /// succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DatabaseError::SerializationFailure(_)
                | DatabaseError::LockTimeout(_)
                | DatabaseError::Deadlock(_)
                | DatabaseError::TooManyTransactions { .. }
        )
    }

    /// Returns true for constraint violations.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DatabaseError::ConstraintViolation(_))
    }

    /// Returns true if the transaction was aborted by this error.
    pub fn aborts_transaction(&self) -> bool {
        matches!(
            self,
            DatabaseError::SerializationFailure(_) | DatabaseError::DurabilityFailure(_)
        )
    }
}

impl From<TransactionError> for DatabaseError {
    fn from(e: TransactionError) -> Self {
        match e {
            TransactionError::UnknownTransaction(txn_id) => {
                DatabaseError::UnknownTransaction(txn_id)
            }
            TransactionError::NotActive { txn_id, state } => {
                DatabaseError::TransactionNotActive { txn_id, state }
            }
            TransactionError::Lock(lock) => lock.into(),
            TransactionError::SerializationFailure(conflict) => {
                DatabaseError::SerializationFailure(conflict.to_string())
            }
            TransactionError::Durability(wal) => DatabaseError::DurabilityFailure(wal),
            TransactionError::TooManyTransactions { limit } => {
                DatabaseError::TooManyTransactions { limit }
            }
        }
    }
}

impl From<LockError> for DatabaseError {
    fn from(e: LockError) -> Self {
        if e.is_deadlock() {
            DatabaseError::Deadlock(e)
        } else {
            DatabaseError::LockTimeout(e)
        }
    }
}

impl From<StorageError> for DatabaseError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Schema(schema) => DatabaseError::Schema(schema),
            StorageError::UnknownTable(name) => DatabaseError::UnknownTable(name),
            StorageError::UnknownColumn(name) => DatabaseError::UnknownColumn(name),
            StorageError::RowNotFound { table, row_id } => {
                DatabaseError::RowNotFound { table, row_id }
            }
            StorageError::Constraint(violation) => DatabaseError::ConstraintViolation(violation),
            StorageError::InvalidPredicate(msg) => DatabaseError::InvalidPredicate(msg),
            StorageError::InvalidJoin(msg) => DatabaseError::InvalidJoin(msg),
            StorageError::Transaction(txn) => txn.into(),
            StorageError::Encoding(msg) => DatabaseError::Corruption(msg),
            StorageError::Internal(msg) => DatabaseError::Internal(msg),
        }
    }
}

impl From<WalError> for DatabaseError {
    fn from(e: WalError) -> Self {
        if e.is_corruption() {
            DatabaseError::Corruption(e.to_string())
        } else if e.is_durability_failure() {
            DatabaseError::DurabilityFailure(e)
        } else {
            DatabaseError::Internal(e.to_string())
        }
    }
}

/// Database result type.
pub type DatabaseResult<T> = Result<T, DatabaseError>;
