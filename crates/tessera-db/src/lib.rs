//! # tessera-db
//!
//! Embedded relational engine for Tessera.
//!
//! This crate provides:
//!
//! - **Database**: the query coordinator. It wires the catalog, storage
//!   engine, constraint enforcer, join executor and transaction manager
//!   together behind one API, and owns recovery and checkpointing.
//!
//! - **Configuration**: [`EngineConfig`], loaded from and saved to TOML.
//!
//! # Quick Start
//!
//! ```ignore
//! use tessera_db::{Database, Predicate, TableSchema, ColumnDef, DataType, Value};
//!
//! let db = Database::open_memory()?;
//! db.define_table(
//!     TableSchema::new("users")
//!         .column(ColumnDef::new("id", DataType::Integer))
//!         .column(ColumnDef::new("name", DataType::Text))
//!         .primary_key(["id"]),
//! )?;
//!
//! let txn = db.begin()?;
//! db.insert(txn, "users", vec![Value::integer(1), Value::text("Alice")])?;
//! db.commit(txn)?;
//!
//! let txn = db.begin()?;
//! for row in db.select(txn, "users", &Predicate::True, None)? {
//!     println!("{}", row);
//! }
//! db.commit(txn)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Engine configuration.
pub mod config;

/// The `Database` coordinator, its errors, recovery and checkpointing.
pub mod database;

pub use config::EngineConfig;
pub use database::{Database, DatabaseError, DatabaseResult, DatabaseStats, RecoveryStats};

// Types callers need to use the API
pub use tessera_common::{Lsn, RowId, Timestamp, TxnId};
pub use tessera_mvcc::IsolationLevel;
pub use tessera_sql::executor::{
    CompareOp, DataType, Decimal, JoinKind, JoinPredicate, Predicate, Row, RowStream, TableRef,
    Value,
};
pub use tessera_sql::storage::{
    ColumnDef, ConstraintViolation, ForeignKeyDef, GcReport, ReferentialAction, SchemaError,
    TableInfo, TableSchema,
};
pub use tessera_txn::TransactionState;
pub use tessera_wal::SyncPolicy;
