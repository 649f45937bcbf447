//! Core identifier types.

mod ids;

pub use ids::{Lsn, RowId, RowKey, TableId, Timestamp, TxnId};
