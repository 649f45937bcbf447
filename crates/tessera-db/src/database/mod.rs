//! # Tessera Database
//!
//! The query coordinator. It wires every component together:
//!
//! - Catalog and storage engine (`tessera-sql`)
//! - Constraint enforcement and joins (`tessera-sql`)
//! - Transaction management and locking (`tessera-txn`)
//! - Version chains and snapshots (`tessera-mvcc`)
//! - Write-ahead log (`tessera-wal`)
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                            Database                              │
//! │                               │                                  │
//! │      ┌────────────────────────┼─────────────────────────┐        │
//! │      ▼                        ▼                         ▼        │
//! │ ┌─────────────┐      ┌─────────────────┐      ┌──────────────┐   │
//! │ │  recovery / │      │  StorageEngine  │      │  TxnManager  │   │
//! │ │  checkpoint │      │                 │      │              │   │
//! │ │             │      │ - Catalog       │      │ - LockManager│   │
//! │ │             │      │ - TableStores   │      │ - Snapshots  │   │
//! │ │             │      │ - Constraints   │      │ - Conflicts  │   │
//! │ │             │      │ - Joins         │      │              │   │
//! │ └──────┬──────┘      └─────────────────┘      └──────┬───────┘   │
//! │        │                                             │           │
//! │        └──────────────────────┬──────────────────────┘           │
//! │                               ▼                                  │
//! │                              WAL                                 │
//! │                        (LogStorage: file or memory)              │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example Usage
//!
//! ```ignore
//! use tessera_db::{Database, IsolationLevel, Predicate, Value};
//!
//! let db = Database::open_memory()?;
//!
//! let txn = db.begin_transaction(IsolationLevel::Serializable)?;
//! let row = db.insert(txn, "users", vec![Value::integer(1), Value::text("Alice")])?;
//! db.update(txn, "users", row, vec![Value::integer(1), Value::text("Bob")])?;
//! db.commit(txn)?;
//! ```

mod checkpoint;
mod engine;
mod error;
mod recovery;

pub use engine::{Database, DatabaseStats};
pub use error::{DatabaseError, DatabaseResult};
pub use recovery::RecoveryStats;
