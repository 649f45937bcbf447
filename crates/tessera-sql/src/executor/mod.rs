//! Row-level execution: values, rows, predicates and joins.
//!
//! # Architecture
//!
//! - **Value**: runtime values (integers, decimals, text, NULL)
//! - **Row**: a tuple of values tagged with its `RowId`
//! - **Predicate**: filters bound against a table's columns
//! - **JoinPredicate**: conditions between two join inputs
//! - **RowStream**: a lazy, pull-based sequence of rows
//! - **join**: hash and nested-loop join over two inputs
//!
//! # Execution Model
//!
//! Streams are plain iterators. Nothing is materialised until pulled,
//! except the build side of a hash join:
//!
//! ```ignore
//! let stream = db.select(txn, "orders", Predicate::True, None)?;
//! for row in stream {
//!     println!("{}", row);
//! }
//! ```

mod join;
mod predicate;
mod row;
mod stream;
mod value;

pub use join::*;
pub use predicate::*;
pub use row::*;
pub use stream::*;
pub use value::*;
