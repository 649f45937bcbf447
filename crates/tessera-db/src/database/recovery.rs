//! Log replay.
//!
//! Recovery runs in two passes over the log, starting at the newest
//! checkpoint whose end record made it to disk:
//!
//! ```text
//!  ... | CkptBegin(7) CreateTable.. Insert.. CkptEnd(7) | Insert(t3) Commit(t3) Insert(t4) |
//!                 ^ replay starts here                                         ^ t4 discarded
//! ```
//!
//! 1. **Analysis**: collect committed transaction ids, the highest commit
//!    timestamp and the highest transaction id.
//! 2. **Redo**: apply DDL and the row images of committed transactions in
//!    log order. Checkpoint rows are system records and always apply.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use tessera_common::{Lsn, Timestamp, TxnId};
use tessera_sql::storage::{RowCodec, StorageEngine, TableSchema};
use tessera_wal::{RecordFlags, WalPayload, WalRecord};

use super::error::{DatabaseError, DatabaseResult};

/// What one recovery run found and replayed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Records read from the log.
    pub records_scanned: usize,
    /// First replayed record: the begin record of the checkpoint recovery
    /// started from, or the start of the log.
    pub start_lsn: Lsn,
    /// Committed transactions whose writes were replayed.
    pub transactions_replayed: usize,
    /// Transactions with logged writes but no commit record.
    pub transactions_discarded: usize,
    /// Tables after replay.
    pub tables: usize,
    /// Live rows after replay.
    pub rows: usize,
}

/// Recovered state the transaction manager must be moved past.
#[derive(Debug)]
pub(crate) struct Recovered {
    pub stats: RecoveryStats,
    pub next_txn_id: TxnId,
    pub last_commit: Timestamp,
}

/// Returns the index of the newest checkpoint begin record with a matching
/// end record.
fn last_checkpoint(records: &[WalRecord]) -> Option<usize> {
    let completed: HashMap<u64, Lsn> = records
        .iter()
        .filter_map(|record| match &record.payload {
            WalPayload::CheckpointEnd(end) => Some((end.checkpoint_id, end.begin_lsn)),
            _ => None,
        })
        .collect();

    records
        .iter()
        .rposition(|record| match &record.payload {
            WalPayload::CheckpointBegin(begin) => {
                completed.get(&begin.checkpoint_id) == Some(&record.lsn())
            }
            _ => false,
        })
}

/// Replays `records` into an empty storage engine.
pub(crate) fn replay(storage: &StorageEngine, records: &[WalRecord]) -> DatabaseResult<Recovered> {
    let checkpoint = last_checkpoint(records);
    let start = checkpoint.unwrap_or(0);
    let records = &records[start..];

    // Records of the starting checkpoint's image. Image records of a
    // checkpoint that never finished are skipped.
    let image_len = match checkpoint {
        Some(_) => records
            .iter()
            .position(|record| matches!(record.payload, WalPayload::CheckpointEnd(_)))
            .map_or(0, |end| end + 1),
        None => 0,
    };

    // Analysis
    let mut committed = HashSet::new();
    let mut writers = HashSet::new();
    let mut last_commit = Timestamp::ZERO;
    let mut max_txn = TxnId::INVALID;
    for record in records {
        let txn = record.txn_id();
        if txn.is_valid() {
            max_txn = max_txn.max(txn);
        }
        match &record.payload {
            WalPayload::Commit(commit) => {
                committed.insert(txn);
                last_commit = last_commit.max(commit.commit_ts);
            }
            WalPayload::CheckpointEnd(end) => last_commit = last_commit.max(end.commit_ts),
            payload if payload.as_row_change().is_some() && !record.is_system() => {
                writers.insert(txn);
            }
            _ => {}
        }
    }

    // Redo
    for (i, record) in records.iter().enumerate() {
        if i >= image_len && record.header.flags.contains(RecordFlags::CHECKPOINT) {
            continue;
        }
        match &record.payload {
            WalPayload::CreateTable(create) => {
                let schema = TableSchema::from_json(&create.definition)?;
                if schema.name != create.table {
                    return Err(DatabaseError::Corruption(format!(
                        "definition of {} logged under the name {}",
                        schema.name, create.table
                    )));
                }
                storage.create_table(schema)?;
            }
            WalPayload::DropTable(drop) => {
                storage.drop_table(&drop.table, drop.cascade)?;
            }
            payload => {
                let Some(change) = payload.as_row_change() else {
                    continue;
                };
                if !record.is_system() && !committed.contains(&record.txn_id()) {
                    continue;
                }
                let values = change
                    .after
                    .as_ref()
                    .map(|image| RowCodec::decode(image))
                    .transpose()?;
                storage.replay_row(&change.table, change.row_id, values)?;
            }
        }
    }

    let transactions_replayed = writers.iter().filter(|txn| committed.contains(txn)).count();
    let transactions_discarded = writers.len() - transactions_replayed;
    let image = storage.committed_image();
    let stats = RecoveryStats {
        records_scanned: start + records.len(),
        start_lsn: records.first().map_or(Lsn::INVALID, |record| record.lsn()),
        transactions_replayed,
        transactions_discarded,
        tables: image.len(),
        rows: image.iter().map(|(_, rows)| rows.len()).sum(),
    };
    debug!(start_lsn = stats.start_lsn.as_u64(), ?stats, "log replayed");

    Ok(Recovered {
        stats,
        next_txn_id: max_txn.next(),
        last_commit,
    })
}
