//! Row predicates and join conditions.
//!
//! Predicates are written against column names and bound to column
//! positions before evaluation. Binding is where types are checked: a
//! comparison between a column and a literal (or another column) of a
//! different type is rejected, never coerced.
//!
//! Evaluation follows SQL three-valued logic. A comparison involving NULL
//! is unknown, unknown rows never match, and `IsNull` is the only way to
//! select NULLs.

use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use super::Value;
use crate::storage::{ColumnDef, StorageError, StorageResult};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

impl CompareOp {
    /// Returns true if `ordering` satisfies the operator.
    pub fn matches(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::NotEq => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::LtEq => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::GtEq => ordering != Ordering::Less,
        }
    }

    /// Returns the operator with its operands exchanged (`a < b` == `b > a`).
    pub fn flip(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::LtEq => CompareOp::GtEq,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::GtEq => CompareOp::LtEq,
            op => op,
        }
    }

    fn apply(self, left: &Value, right: &Value) -> Option<bool> {
        left.compare(right).map(|ordering| self.matches(ordering))
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::NotEq => "<>",
            CompareOp::Lt => "<",
            CompareOp::LtEq => "<=",
            CompareOp::Gt => ">",
            CompareOp::GtEq => ">=",
        };
        write!(f, "{}", s)
    }
}

/// A filter over a single table's rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every row.
    True,
    /// `column op value`.
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Literal to compare with.
        value: Value,
    },
    /// `column IS NULL`.
    IsNull(String),
    /// `column IS NOT NULL`.
    IsNotNull(String),
    /// Both sides match.
    And(Box<Predicate>, Box<Predicate>),
    /// Either side matches.
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// `column op value`.
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Predicate::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// `column <> value`.
    pub fn not_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::NotEq, value)
    }

    /// `column < value`.
    pub fn lt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Lt, value)
    }

    /// `column <= value`.
    pub fn lt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::LtEq, value)
    }

    /// `column > value`.
    pub fn gt(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Gt, value)
    }

    /// `column >= value`.
    pub fn gt_eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::GtEq, value)
    }

    /// `column IS NULL`.
    pub fn is_null(column: impl Into<String>) -> Self {
        Predicate::IsNull(column.into())
    }

    /// `column IS NOT NULL`.
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Predicate::IsNotNull(column.into())
    }

    /// `self AND other`.
    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    /// `self OR other`.
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// `NOT self`.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Resolves column names against `columns` and checks literal types.
    pub fn bind(&self, columns: &[ColumnDef]) -> StorageResult<BoundPredicate> {
        Ok(match self {
            Predicate::True => BoundPredicate::True,
            Predicate::Compare { column, op, value } => {
                let index = resolve(columns, column)?;
                let def = &columns[index];
                if !value.fits(def.data_type) {
                    return Err(StorageError::InvalidPredicate(format!(
                        "cannot compare {} column {} with {}",
                        def.data_type, def.name, value
                    )));
                }
                BoundPredicate::Compare {
                    column: index,
                    op: *op,
                    value: value.clone(),
                }
            }
            Predicate::IsNull(column) => BoundPredicate::IsNull(resolve(columns, column)?),
            Predicate::IsNotNull(column) => BoundPredicate::IsNotNull(resolve(columns, column)?),
            Predicate::And(l, r) => {
                BoundPredicate::And(Box::new(l.bind(columns)?), Box::new(r.bind(columns)?))
            }
            Predicate::Or(l, r) => {
                BoundPredicate::Or(Box::new(l.bind(columns)?), Box::new(r.bind(columns)?))
            }
            Predicate::Not(inner) => BoundPredicate::Not(Box::new(inner.bind(columns)?)),
        })
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::True
    }
}

fn resolve(columns: &[ColumnDef], name: &str) -> StorageResult<usize> {
    columns
        .iter()
        .position(|c| c.name == name)
        .ok_or_else(|| StorageError::UnknownColumn(name.to_string()))
}

/// A predicate with columns resolved to positions.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundPredicate {
    /// Matches every row.
    True,
    /// `values[column] op value`.
    Compare {
        /// Column position.
        column: usize,
        /// Operator.
        op: CompareOp,
        /// Literal.
        value: Value,
    },
    /// `values[column] IS NULL`.
    IsNull(usize),
    /// `values[column] IS NOT NULL`.
    IsNotNull(usize),
    /// Conjunction.
    And(Box<BoundPredicate>, Box<BoundPredicate>),
    /// Disjunction.
    Or(Box<BoundPredicate>, Box<BoundPredicate>),
    /// Negation.
    Not(Box<BoundPredicate>),
}

impl BoundPredicate {
    /// Returns true if the row matches.
    pub fn evaluate(&self, values: &[Value]) -> bool {
        self.eval(values) == Some(true)
    }

    fn eval(&self, values: &[Value]) -> Option<bool> {
        match self {
            BoundPredicate::True => Some(true),
            BoundPredicate::Compare { column, op, value } => {
                op.apply(values.get(*column)?, value)
            }
            BoundPredicate::IsNull(column) => {
                Some(values.get(*column).map_or(true, Value::is_null))
            }
            BoundPredicate::IsNotNull(column) => {
                Some(values.get(*column).map_or(false, |v| !v.is_null()))
            }
            BoundPredicate::And(l, r) => match (l.eval(values), r.eval(values)) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            },
            BoundPredicate::Or(l, r) => match (l.eval(values), r.eval(values)) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            },
            BoundPredicate::Not(inner) => inner.eval(values).map(|b| !b),
        }
    }

    /// Works out how an ordered index on `index_columns` can narrow a scan.
    ///
    /// Only top-level conjuncts are considered. Returns `Exact` when every
    /// index column is pinned by an equality, a range over the first index
    /// column when it is bounded, and `None` otherwise.
    pub fn index_scan(&self, index_columns: &[usize]) -> Option<IndexScan> {
        let mut conjuncts = Vec::new();
        self.collect_conjuncts(&mut conjuncts);

        let equality = |column: usize| {
            conjuncts.iter().find_map(|c| match c {
                BoundPredicate::Compare {
                    column: col,
                    op: CompareOp::Eq,
                    value,
                } if *col == column && !value.is_null() => Some(value.clone()),
                _ => None,
            })
        };

        let exact: Option<Vec<Value>> = index_columns.iter().map(|&c| equality(c)).collect();
        if let Some(key) = exact {
            if !key.is_empty() {
                return Some(IndexScan::Exact(key));
            }
        }

        let first = *index_columns.first()?;
        let mut lower = Bound::Unbounded;
        let mut upper = Bound::Unbounded;
        for conjunct in &conjuncts {
            let BoundPredicate::Compare { column, op, value } = conjunct else {
                continue;
            };
            if *column != first || value.is_null() {
                continue;
            }
            match op {
                CompareOp::Eq => {
                    lower = tighter_lower(lower, Bound::Included(value.clone()));
                    upper = tighter_upper(upper, Bound::Included(value.clone()));
                }
                CompareOp::Gt => lower = tighter_lower(lower, Bound::Excluded(value.clone())),
                CompareOp::GtEq => lower = tighter_lower(lower, Bound::Included(value.clone())),
                CompareOp::Lt => upper = tighter_upper(upper, Bound::Excluded(value.clone())),
                CompareOp::LtEq => upper = tighter_upper(upper, Bound::Included(value.clone())),
                CompareOp::NotEq => {}
            }
        }

        match (&lower, &upper) {
            (Bound::Unbounded, Bound::Unbounded) => None,
            _ => Some(IndexScan::Range { lower, upper }),
        }
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a BoundPredicate>) {
        match self {
            BoundPredicate::And(l, r) => {
                l.collect_conjuncts(out);
                r.collect_conjuncts(out);
            }
            other => out.push(other),
        }
    }
}

fn bound_value(bound: &Bound<Value>) -> Option<&Value> {
    match bound {
        Bound::Included(v) | Bound::Excluded(v) => Some(v),
        Bound::Unbounded => None,
    }
}

fn tighter_lower(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (Some(a), Some(b)) if b > a => candidate,
        (Some(a), Some(b)) if b == a && matches!(candidate, Bound::Excluded(_)) => candidate,
        _ => current,
    }
}

fn tighter_upper(current: Bound<Value>, candidate: Bound<Value>) -> Bound<Value> {
    match (bound_value(&current), bound_value(&candidate)) {
        (None, _) => candidate,
        (Some(a), Some(b)) if b < a => candidate,
        (Some(a), Some(b)) if b == a && matches!(candidate, Bound::Excluded(_)) => candidate,
        _ => current,
    }
}

/// How an ordered index narrows a scan.
#[derive(Debug, Clone, PartialEq)]
pub enum IndexScan {
    /// Every index column is pinned to a value.
    Exact(Vec<Value>),
    /// The first index column lies within the bounds.
    Range {
        /// Lower bound on the first key column.
        lower: Bound<Value>,
        /// Upper bound on the first key column.
        upper: Bound<Value>,
    },
}

impl IndexScan {
    /// Returns true if a key's first column can satisfy the scan. NULL
    /// never does.
    pub fn admits_first(&self, first: &Value) -> bool {
        if first.is_null() {
            return false;
        }
        match self {
            IndexScan::Exact(key) => key.first() == Some(first),
            IndexScan::Range { lower, upper } => {
                let above = match lower {
                    Bound::Included(v) => first >= v,
                    Bound::Excluded(v) => first > v,
                    Bound::Unbounded => true,
                };
                let below = match upper {
                    Bound::Included(v) => first <= v,
                    Bound::Excluded(v) => first < v,
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }
}

/// A condition between the rows of two join inputs.
///
/// `left` names refer to the left input's columns, `right` names to the
/// right input's.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinPredicate {
    /// `left = right`.
    Eq {
        /// Left column.
        left: String,
        /// Right column.
        right: String,
    },
    /// `left op right`.
    Compare {
        /// Left column.
        left: String,
        /// Operator.
        op: CompareOp,
        /// Right column.
        right: String,
    },
    /// All conditions hold. An empty list always holds.
    And(Vec<JoinPredicate>),
    /// At least one condition holds.
    Or(Vec<JoinPredicate>),
}

impl JoinPredicate {
    /// `left = right`.
    pub fn eq(left: impl Into<String>, right: impl Into<String>) -> Self {
        JoinPredicate::Eq {
            left: left.into(),
            right: right.into(),
        }
    }

    /// `left op right`.
    pub fn compare(left: impl Into<String>, op: CompareOp, right: impl Into<String>) -> Self {
        JoinPredicate::Compare {
            left: left.into(),
            op,
            right: right.into(),
        }
    }

    /// Conjunction of `conditions`.
    pub fn and(conditions: Vec<JoinPredicate>) -> Self {
        JoinPredicate::And(conditions)
    }

    /// Disjunction of `conditions`.
    pub fn or(conditions: Vec<JoinPredicate>) -> Self {
        JoinPredicate::Or(conditions)
    }

    /// Resolves column names and checks that compared columns share a type.
    pub fn bind(&self, left: &[ColumnDef], right: &[ColumnDef]) -> StorageResult<BoundJoinPredicate> {
        Ok(match self {
            JoinPredicate::Eq { left: l, right: r } => bind_compare(left, right, l, CompareOp::Eq, r)?,
            JoinPredicate::Compare {
                left: l,
                op,
                right: r,
            } => bind_compare(left, right, l, *op, r)?,
            JoinPredicate::And(items) => BoundJoinPredicate::And(
                items
                    .iter()
                    .map(|p| p.bind(left, right))
                    .collect::<StorageResult<_>>()?,
            ),
            JoinPredicate::Or(items) => BoundJoinPredicate::Or(
                items
                    .iter()
                    .map(|p| p.bind(left, right))
                    .collect::<StorageResult<_>>()?,
            ),
        })
    }
}

fn bind_compare(
    left: &[ColumnDef],
    right: &[ColumnDef],
    left_name: &str,
    op: CompareOp,
    right_name: &str,
) -> StorageResult<BoundJoinPredicate> {
    let l = resolve(left, left_name)?;
    let r = resolve(right, right_name)?;
    if left[l].data_type != right[r].data_type {
        return Err(StorageError::InvalidJoin(format!(
            "cannot compare {} column {} with {} column {}",
            left[l].data_type, left_name, right[r].data_type, right_name
        )));
    }
    Ok(BoundJoinPredicate::Compare {
        left: l,
        op,
        right: r,
    })
}

/// A join condition with columns resolved to positions.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundJoinPredicate {
    /// `left[l] op right[r]`.
    Compare {
        /// Left column position.
        left: usize,
        /// Operator.
        op: CompareOp,
        /// Right column position.
        right: usize,
    },
    /// Conjunction.
    And(Vec<BoundJoinPredicate>),
    /// Disjunction.
    Or(Vec<BoundJoinPredicate>),
}

impl BoundJoinPredicate {
    /// Returns true if the pair matches. NULLs never match.
    pub fn evaluate(&self, left: &[Value], right: &[Value]) -> bool {
        match self {
            BoundJoinPredicate::Compare { left: l, op, right: r } => {
                match (left.get(*l), right.get(*r)) {
                    (Some(a), Some(b)) => op.apply(a, b) == Some(true),
                    _ => false,
                }
            }
            BoundJoinPredicate::And(items) => items.iter().all(|p| p.evaluate(left, right)),
            BoundJoinPredicate::Or(items) => items.iter().any(|p| p.evaluate(left, right)),
        }
    }

    /// Returns the key columns if the condition is a pure conjunction of
    /// equalities, which makes it hashable.
    pub fn equi_keys(&self) -> Option<(Vec<usize>, Vec<usize>)> {
        let mut left = Vec::new();
        let mut right = Vec::new();
        if !self.collect_equalities(&mut left, &mut right) || left.is_empty() {
            return None;
        }
        Some((left, right))
    }

    fn collect_equalities(&self, left: &mut Vec<usize>, right: &mut Vec<usize>) -> bool {
        match self {
            BoundJoinPredicate::Compare {
                left: l,
                op: CompareOp::Eq,
                right: r,
            } => {
                left.push(*l);
                right.push(*r);
                true
            }
            BoundJoinPredicate::And(items) => {
                items.iter().all(|p| p.collect_equalities(left, right))
            }
            _ => false,
        }
    }

    /// Returns the same condition with the inputs exchanged.
    pub fn swapped(&self) -> BoundJoinPredicate {
        match self {
            BoundJoinPredicate::Compare { left, op, right } => BoundJoinPredicate::Compare {
                left: *right,
                op: op.flip(),
                right: *left,
            },
            BoundJoinPredicate::And(items) => {
                BoundJoinPredicate::And(items.iter().map(Self::swapped).collect())
            }
            BoundJoinPredicate::Or(items) => {
                BoundJoinPredicate::Or(items.iter().map(Self::swapped).collect())
            }
        }
    }
}
