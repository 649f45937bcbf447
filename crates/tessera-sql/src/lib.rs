//! # tessera-sql
//!
//! Relational layer of Tessera.
//!
//! This crate implements:
//! - Typed values and rows
//! - Predicates over a single table and join predicates over two
//! - The table catalog with key and foreign-key validation
//! - Versioned table storage with ordered indexes
//! - Constraint enforcement with cascading referential actions
//! - Hash and nested-loop joins producing lazy row streams
//!
//! There is no SQL text here: callers hand in logical operations.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Values, rows, predicates and join execution
pub mod executor;

/// Catalog, table storage and constraint enforcement
pub mod storage;
