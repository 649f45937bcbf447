//! Ordered secondary structures over a table's key columns.
//!
//! An index maps key tuples to the rows that have (or had) that key in
//! some version. Entries are never authoritative: callers re-check the
//! version they can actually see. Stale entries are dropped by garbage
//! collection.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use tessera_common::RowId;

use crate::executor::{IndexScan, Value};

/// An ordered index on one column set.
#[derive(Debug, Clone)]
pub struct OrderedIndex {
    columns: Vec<usize>,
    entries: BTreeMap<Vec<Value>, BTreeSet<RowId>>,
}

impl OrderedIndex {
    /// Creates an empty index on `columns`.
    pub fn new(columns: Vec<usize>) -> Self {
        Self {
            columns,
            entries: BTreeMap::new(),
        }
    }

    /// Returns the indexed column positions.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Extracts this index's key from a row's values.
    pub fn key_of(&self, values: &[Value]) -> Vec<Value> {
        self.columns
            .iter()
            .map(|&c| values.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Adds an entry.
    pub fn insert(&mut self, key: Vec<Value>, row: RowId) {
        self.entries.entry(key).or_default().insert(row);
    }

    /// Removes an entry. Returns true if it existed.
    pub fn remove(&mut self, key: &[Value], row: RowId) -> bool {
        let Some(rows) = self.entries.get_mut(key) else {
            return false;
        };
        let removed = rows.remove(&row);
        if rows.is_empty() {
            self.entries.remove(key);
        }
        removed
    }

    /// Returns the rows filed under `key`.
    pub fn get(&self, key: &[Value]) -> Vec<RowId> {
        self.entries
            .get(key)
            .map(|rows| rows.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Returns the candidate rows for a scan, in `RowId` order.
    pub fn scan(&self, scan: &IndexScan) -> BTreeSet<RowId> {
        match scan {
            IndexScan::Exact(key) if key.len() == self.columns.len() => {
                self.entries.get(key).cloned().unwrap_or_default()
            }
            _ => {
                let start = match scan {
                    IndexScan::Range {
                        lower: Bound::Included(v) | Bound::Excluded(v),
                        ..
                    } => Bound::Included(vec![v.clone()]),
                    IndexScan::Exact(key) => match key.first() {
                        Some(v) => Bound::Included(vec![v.clone()]),
                        None => Bound::Unbounded,
                    },
                    _ => Bound::Unbounded,
                };
                let upper_done = |first: &Value| match scan {
                    IndexScan::Range { upper, .. } => match upper {
                        Bound::Included(v) => first > v,
                        Bound::Excluded(v) => first >= v,
                        Bound::Unbounded => false,
                    },
                    IndexScan::Exact(key) => key.first().map_or(false, |v| first > v),
                };
                self.entries
                    .range((start, Bound::Unbounded))
                    .take_while(|(key, _)| key.first().map_or(true, |first| !upper_done(first)))
                    .filter(|(key, _)| key.first().map_or(false, |first| scan.admits_first(first)))
                    .flat_map(|(_, rows)| rows.iter().copied())
                    .collect()
            }
        }
    }

    /// Returns the number of distinct keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the index has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
