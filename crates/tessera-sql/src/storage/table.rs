//! Per-table row storage.
//!
//! `TableStore` keeps one version chain per row, ordered by `RowId`, plus
//! an ordered index per key column set. Index entries are added for every
//! installed version and only removed by [`TableStore::vacuum`], so an
//! index lookup yields a superset of the rows that currently hold a key.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use tessera_common::{RowId, TableId, Timestamp, TxnId};
use tessera_mvcc::{Snapshot, VersionChain, VersionId};

use crate::executor::{BoundPredicate, IndexScan, Row, Value};

use super::catalog::TableInfo;
use super::index::OrderedIndex;

/// Version chain of a stored row.
pub type RowChain = VersionChain<Row>;

/// Work done by one vacuum pass over a table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VacuumStats {
    /// Versions removed from chains.
    pub versions: u64,
    /// Rows removed entirely.
    pub rows: u64,
    /// Index entries removed.
    pub index_entries: u64,
}

impl VacuumStats {
    pub(crate) fn add(&mut self, other: VacuumStats) {
        self.versions += other.versions;
        self.rows += other.rows;
        self.index_entries += other.index_entries;
    }
}

/// Row storage for one table.
#[derive(Debug)]
pub struct TableStore {
    info: RwLock<Arc<TableInfo>>,
    rows: RwLock<BTreeMap<RowId, Arc<RowChain>>>,
    indexes: RwLock<Vec<OrderedIndex>>,
    next_row_id: AtomicU64,
}

impl TableStore {
    /// Creates an empty store with an index per key column set.
    pub fn new(info: Arc<TableInfo>) -> Self {
        let indexes = info
            .indexed_column_sets()
            .into_iter()
            .map(OrderedIndex::new)
            .collect();
        Self {
            info: RwLock::new(info),
            rows: RwLock::new(BTreeMap::new()),
            indexes: RwLock::new(indexes),
            next_row_id: AtomicU64::new(RowId::FIRST.as_u64()),
        }
    }

    /// Returns the table metadata.
    pub fn info(&self) -> Arc<TableInfo> {
        Arc::clone(&self.info.read())
    }

    /// Replaces the table metadata (after a dependency was dropped).
    pub fn set_info(&self, info: Arc<TableInfo>) {
        *self.info.write() = info;
    }

    /// Returns the table id.
    pub fn id(&self) -> TableId {
        self.info.read().id
    }

    /// Hands out the next row id.
    pub fn allocate_row_id(&self) -> RowId {
        RowId::new(self.next_row_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Makes sure future ids are above `row_id`.
    pub fn observe_row_id(&self, row_id: RowId) {
        self.next_row_id
            .fetch_max(row_id.as_u64() + 1, Ordering::SeqCst);
    }

    /// Returns the id the next inserted row will get.
    pub fn next_row_id(&self) -> RowId {
        RowId::new(self.next_row_id.load(Ordering::SeqCst))
    }

    /// Returns the number of row chains, including deleted rows not yet
    /// vacuumed.
    pub fn chain_count(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns a row's version chain.
    pub fn chain(&self, row_id: RowId) -> Option<Arc<RowChain>> {
        self.rows.read().get(&row_id).cloned()
    }

    /// Returns the row visible in `snapshot`.
    pub fn read(&self, row_id: RowId, snapshot: &Snapshot) -> Option<Row> {
        self.chain(row_id)?.read(snapshot)
    }

    /// Returns the rows any version of which had `key` on `columns`, or
    /// every row when no index covers `columns`.
    pub fn candidates(&self, columns: &[usize], key: &[Value]) -> Vec<RowId> {
        let indexes = self.indexes.read();
        match indexes.iter().find(|i| i.columns() == columns) {
            Some(index) => index.get(key),
            None => self.rows.read().keys().copied().collect(),
        }
    }

    /// Installs a pending version and files its index entries.
    pub fn install(
        &self,
        row_id: RowId,
        version: VersionId,
        txn_id: TxnId,
        data: Option<Row>,
    ) -> Arc<RowChain> {
        if let Some(row) = &data {
            self.index_row(row_id, row.values());
        }
        let chain = Arc::clone(self.rows.write().entry(row_id).or_default());
        chain.push(version, txn_id, data);
        chain
    }

    /// Replaces a row with a single committed version, or removes it.
    /// Used when replaying the log.
    pub fn restore_row(&self, row_id: RowId, version: VersionId, ts: Timestamp, data: Option<Row>) {
        self.observe_row_id(row_id);
        let old = {
            let mut rows = self.rows.write();
            match &data {
                Some(_) => rows.insert(
                    row_id,
                    Arc::new(RowChain::with_committed(version, ts, data.clone())),
                ),
                None => rows.remove(&row_id),
            }
        };
        if let Some(old) = old {
            let mut indexes = self.indexes.write();
            for row in old.all_data() {
                for index in indexes.iter_mut() {
                    let key = index.key_of(row.values());
                    index.remove(&key, row_id);
                }
            }
        }
        if let Some(row) = &data {
            self.index_row(row_id, row.values());
        }
    }

    /// Returns the newest committed contents of every live row, in `RowId`
    /// order.
    pub fn committed_rows(&self) -> Vec<Row> {
        self.rows
            .read()
            .values()
            .filter_map(|chain| chain.latest_committed().and_then(|(_, data)| data))
            .collect()
    }

    /// Starts a lazy scan. Rows come out in `RowId` order; `candidates`
    /// narrows the rows examined, `predicate` is always re-checked.
    pub fn scan(
        self: &Arc<Self>,
        snapshot: Snapshot,
        predicate: BoundPredicate,
        candidates: Option<BTreeSet<RowId>>,
    ) -> ScanCursor {
        ScanCursor {
            store: Arc::clone(self),
            snapshot,
            predicate,
            candidates: candidates.map(BTreeSet::into_iter),
            last: None,
        }
    }

    /// Works out the candidate rows for `predicate` from the first index
    /// that narrows it.
    pub fn index_candidates(&self, predicate: &BoundPredicate) -> Option<BTreeSet<RowId>> {
        let indexes = self.indexes.read();
        let (index, scan) = indexes
            .iter()
            .find_map(|index| predicate.index_scan(index.columns()).map(|s| (index, s)))?;
        Some(match &scan {
            IndexScan::Exact(key) if key.iter().any(Value::is_null) => BTreeSet::new(),
            _ => index.scan(&scan),
        })
    }

    /// Prunes versions invisible at `watermark`, drops dead rows and their
    /// stale index entries.
    pub fn vacuum(&self, watermark: Timestamp) -> VacuumStats {
        let mut stats = VacuumStats::default();
        let chains: Vec<(RowId, Arc<RowChain>)> = self
            .rows
            .read()
            .iter()
            .map(|(id, chain)| (*id, Arc::clone(chain)))
            .collect();

        for (row_id, chain) in chains {
            let pruned = chain.prune(watermark);
            let mut pass = VacuumStats {
                versions: pruned.removed_versions as u64,
                ..VacuumStats::default()
            };

            if !pruned.removed.is_empty() {
                let remaining = chain.all_data();
                let mut indexes = self.indexes.write();
                for index in indexes.iter_mut() {
                    let kept: HashSet<Vec<Value>> = remaining
                        .iter()
                        .map(|row| index.key_of(row.values()))
                        .collect();
                    for row in &pruned.removed {
                        let key = index.key_of(row.values());
                        if !kept.contains(&key) && index.remove(&key, row_id) {
                            pass.index_entries += 1;
                        }
                    }
                }
            }

            if pruned.dead {
                self.rows.write().remove(&row_id);
                pass.rows = 1;
            }
            stats.add(pass);
        }
        stats
    }

    fn index_row(&self, row_id: RowId, values: &[Value]) {
        let mut indexes = self.indexes.write();
        for index in indexes.iter_mut() {
            let key = index.key_of(values);
            index.insert(key, row_id);
        }
    }
}

/// Lazy cursor over a table's visible rows.
#[derive(Debug)]
pub struct ScanCursor {
    store: Arc<TableStore>,
    snapshot: Snapshot,
    predicate: BoundPredicate,
    candidates: Option<std::collections::btree_set::IntoIter<RowId>>,
    last: Option<RowId>,
}

impl ScanCursor {
    fn next_chain(&mut self) -> Option<(RowId, Arc<RowChain>)> {
        match &mut self.candidates {
            Some(ids) => loop {
                let id = ids.next()?;
                if let Some(chain) = self.store.chain(id) {
                    return Some((id, chain));
                }
            },
            None => {
                let lower = self.last.map_or(Bound::Unbounded, Bound::Excluded);
                let rows = self.store.rows.read();
                let (id, chain) = rows.range((lower, Bound::Unbounded)).next()?;
                self.last = Some(*id);
                Some((*id, Arc::clone(chain)))
            }
        }
    }
}

impl Iterator for ScanCursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        loop {
            let (_, chain) = self.next_chain()?;
            if let Some(row) = chain.read(&self.snapshot) {
                if self.predicate.evaluate(row.values()) {
                    return Some(row);
                }
            }
        }
    }
}
