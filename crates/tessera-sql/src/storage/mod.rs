//! Storage layer.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      StorageEngine                          │
//! │  insert / update / delete / select / join / vacuum          │
//! └─────────────────────────────────────────────────────────────┘
//!        │                    │                     │
//!        ▼                    ▼                     ▼
//! ┌─────────────┐  ┌─────────────────────┐  ┌─────────────────┐
//! │   Catalog   │  │      Planner        │  │   TableStore    │
//! │  (schemas,  │  │ (keys, foreign keys,│  │ (version chains,│
//! │   keys)     │  │  cascades, locks)   │  │  ordered index) │
//! └─────────────┘  └─────────────────────┘  └─────────────────┘
//!                                                   │
//!                                                   ▼
//!                                          ┌─────────────────┐
//!                                          │ TransactionMgr  │
//!                                          │ (locks, commit) │
//!                                          └─────────────────┘
//! ```

mod catalog;
mod constraints;
mod encoder;
mod engine;
mod error;
mod index;
mod schema;
mod table;

pub use catalog::{Catalog, DroppedTable, ForeignKeyInfo, TableInfo};
pub use encoder::RowCodec;
pub use engine::{GcReport, StorageEngine, StorageStats};
pub use error::{ConstraintViolation, SchemaError, StorageError, StorageResult};
pub use index::OrderedIndex;
pub use schema::{ColumnDef, ForeignKeyDef, ReferentialAction, TableSchema};
pub use table::{RowChain, ScanCursor, TableStore, VacuumStats};
