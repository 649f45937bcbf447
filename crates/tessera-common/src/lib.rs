//! # tessera-common
//!
//! Identifier types and constants shared by every Tessera crate.
//!
//! - **Types**: `TxnId`, `TableId`, `RowId`, `Lsn` and the logical `Timestamp`
//! - **Constants**: WAL framing and default limits
//!
//! ## Example
//!
//! ```rust
//! use tessera_common::{RowId, TableId, TxnId};
//!
//! let txn = TxnId::new(7);
//! let table = TableId::new(1);
//! let row = RowId::FIRST;
//! assert!(txn.is_valid() && table.is_valid() && row.is_valid());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constants;
pub mod types;

pub use constants::*;
pub use types::{Lsn, RowId, RowKey, TableId, Timestamp, TxnId};
