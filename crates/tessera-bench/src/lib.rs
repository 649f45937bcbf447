//! Tessera Performance Benchmarks
//!
//! This crate contains benchmarks for Tessera components:
//! - Row encoding and ordered indexes
//! - Hash and nested-loop joins
//! - End-to-end database operations, including commit and checkpoint cost
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p tessera-bench
//! ```

pub mod utils;
