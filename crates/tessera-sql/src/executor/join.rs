//! Binary join execution.
//!
//! ```text
//!   left input ──┐                    ┌── matched pairs, in left order,
//!                ├── JoinIter ───────►│   right order within a left row
//!   right input ─┘   (hash / loop)    └── null-padded rows for outer joins
//! ```
//!
//! An equality-only condition is hashed on the smaller input; anything else
//! runs as a nested loop. Right joins swap the inputs, run as left joins and
//! put the columns back in left/right order. Full joins are left joins
//! followed by the right rows nothing matched.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{BoundJoinPredicate, Row, RowStream, Value};

/// Join kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    /// Matched pairs only.
    Inner,
    /// Every left row, null-padded when unmatched.
    Left,
    /// Every right row, null-padded when unmatched.
    Right,
    /// Every row of both sides.
    Full,
    /// A table joined with itself under two aliases (inner semantics).
    SelfJoin,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => write!(f, "INNER JOIN"),
            JoinKind::Left => write!(f, "LEFT JOIN"),
            JoinKind::Right => write!(f, "RIGHT JOIN"),
            JoinKind::Full => write!(f, "FULL JOIN"),
            JoinKind::SelfJoin => write!(f, "SELF JOIN"),
        }
    }
}

/// A table named in a join, optionally under an alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    /// Table name.
    pub table: String,
    /// Alias; defaults to the table name.
    pub alias: Option<String>,
}

impl TableRef {
    /// References a table under its own name.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: None,
        }
    }

    /// Sets the alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Returns the name output columns are qualified with.
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

impl From<&str> for TableRef {
    fn from(table: &str) -> Self {
        TableRef::new(table)
    }
}

/// One side of a join: the rows read from a table and their column names.
#[derive(Debug, Clone)]
pub struct JoinInput {
    /// Qualifier for output columns.
    pub alias: String,
    /// Unqualified column names.
    pub columns: Vec<String>,
    /// Rows, in scan order. Shared when a table is joined with itself.
    pub rows: Arc<Vec<Row>>,
}

impl JoinInput {
    /// Creates a join input.
    pub fn new(alias: impl Into<String>, columns: Vec<String>, rows: Arc<Vec<Row>>) -> Self {
        Self {
            alias: alias.into(),
            columns,
            rows,
        }
    }

    fn qualified_columns(&self) -> impl Iterator<Item = String> + '_ {
        self.columns
            .iter()
            .map(move |c| format!("{}.{}", self.alias, c))
    }
}

/// Joins two inputs.
///
/// Output columns are `alias.column`, left then right.
pub fn execute_join(
    kind: JoinKind,
    left: JoinInput,
    right: JoinInput,
    predicate: &BoundJoinPredicate,
) -> RowStream {
    let columns: Vec<String> = left
        .qualified_columns()
        .chain(right.qualified_columns())
        .collect();

    let widths = (left.columns.len(), right.columns.len());
    let iter = match kind {
        JoinKind::Inner | JoinKind::SelfJoin => {
            JoinIter::new(left.rows, right.rows, widths, predicate.clone(), false, false)
        }
        JoinKind::Left => {
            JoinIter::new(left.rows, right.rows, widths, predicate.clone(), true, false)
        }
        JoinKind::Full => {
            JoinIter::new(left.rows, right.rows, widths, predicate.clone(), true, true)
        }
        JoinKind::Right => {
            let (left_width, right_width) = widths;
            let swapped = JoinIter::new(
                right.rows,
                left.rows,
                (right_width, left_width),
                predicate.swapped(),
                true,
                false,
            );
            return RowStream::new(
                columns,
                swapped.map(move |row| {
                    let mut values = row.into_values();
                    values.rotate_left(right_width);
                    Row::new(values)
                }),
            );
        }
    };

    RowStream::new(columns, iter)
}

/// How left rows find their right matches.
enum Matcher {
    /// Probe a hash table built over the right input.
    Probe {
        table: HashMap<Vec<Value>, Vec<usize>>,
        left_keys: Vec<usize>,
    },
    /// Matches worked out up front by hashing the (smaller) left input.
    Precomputed(Vec<Vec<usize>>),
    /// Evaluate the condition against every right row.
    NestedLoop(BoundJoinPredicate),
}

fn hash_key(row: &Row, columns: &[usize]) -> Option<Vec<Value>> {
    columns
        .iter()
        .map(|&c| row.get(c).filter(|v| !v.is_null()).cloned())
        .collect()
}

impl Matcher {
    fn build(left: &[Row], right: &[Row], predicate: BoundJoinPredicate) -> Self {
        let Some((left_keys, right_keys)) = predicate.equi_keys() else {
            return Matcher::NestedLoop(predicate);
        };

        if right.len() <= left.len() {
            let mut table: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
            for (i, row) in right.iter().enumerate() {
                if let Some(key) = hash_key(row, &right_keys) {
                    table.entry(key).or_default().push(i);
                }
            }
            return Matcher::Probe { table, left_keys };
        }

        let mut table: HashMap<Vec<Value>, Vec<usize>> = HashMap::new();
        for (i, row) in left.iter().enumerate() {
            if let Some(key) = hash_key(row, &left_keys) {
                table.entry(key).or_default().push(i);
            }
        }
        // Walking the right input in order keeps each left row's matches
        // in right scan order.
        let mut matches = vec![Vec::new(); left.len()];
        for (j, row) in right.iter().enumerate() {
            let Some(key) = hash_key(row, &right_keys) else {
                continue;
            };
            if let Some(lefts) = table.get(&key) {
                for &i in lefts {
                    matches[i].push(j);
                }
            }
        }
        Matcher::Precomputed(matches)
    }

    fn matches(&self, index: usize, left: &Row, right: &[Row]) -> Vec<usize> {
        match self {
            Matcher::Probe { table, left_keys } => hash_key(left, left_keys)
                .and_then(|key| table.get(&key).cloned())
                .unwrap_or_default(),
            Matcher::Precomputed(all) => all.get(index).cloned().unwrap_or_default(),
            Matcher::NestedLoop(predicate) => right
                .iter()
                .enumerate()
                .filter(|(_, r)| predicate.evaluate(left.values(), r.values()))
                .map(|(j, _)| j)
                .collect(),
        }
    }
}

/// Pull-based join over two materialised inputs.
struct JoinIter {
    left: Arc<Vec<Row>>,
    right: Arc<Vec<Row>>,
    matcher: Matcher,
    pad_left_rows: bool,
    emit_unmatched_right: bool,
    left_width: usize,
    right_width: usize,
    left_pos: usize,
    current: Option<(usize, Vec<usize>, usize)>,
    right_matched: Vec<bool>,
    right_pos: usize,
}

impl JoinIter {
    fn new(
        left: Arc<Vec<Row>>,
        right: Arc<Vec<Row>>,
        (left_width, right_width): (usize, usize),
        predicate: BoundJoinPredicate,
        pad_left_rows: bool,
        emit_unmatched_right: bool,
    ) -> Self {
        let matcher = Matcher::build(&left, &right, predicate);
        let right_matched = vec![false; right.len()];
        Self {
            left,
            right,
            matcher,
            pad_left_rows,
            emit_unmatched_right,
            left_width,
            right_width,
            left_pos: 0,
            current: None,
            right_matched,
            right_pos: 0,
        }
    }
}

impl Iterator for JoinIter {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            if let Some((i, matches, pos)) = &mut self.current {
                if let Some(&j) = matches.get(*pos) {
                    *pos += 1;
                    self.right_matched[j] = true;
                    return Some(self.left[*i].concat(&self.right[j]));
                }
                self.current = None;
            }

            if self.left_pos < self.left.len() {
                let i = self.left_pos;
                self.left_pos += 1;
                let matches = self.matcher.matches(i, &self.left[i], &self.right);
                if matches.is_empty() {
                    if self.pad_left_rows {
                        return Some(self.left[i].concat(&Row::nulls(self.right_width)));
                    }
                    continue;
                }
                self.current = Some((i, matches, 0));
                continue;
            }

            if !self.emit_unmatched_right {
                return None;
            }
            while self.right_pos < self.right.len() {
                let j = self.right_pos;
                self.right_pos += 1;
                if !self.right_matched[j] {
                    return Some(Row::nulls(self.left_width).concat(&self.right[j]));
                }
            }
            return None;
        }
    }
}
