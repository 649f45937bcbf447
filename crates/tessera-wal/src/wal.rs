//! Main WAL manager.
//!
//! [`Wal`] assigns LSNs, frames records and pushes them to a
//! [`LogStorage`]. Every public write is a single batch followed by a sync,
//! so a transaction's row changes and its commit record become durable
//! together.
//!
//! A failed append or sync halts the log: later writes fail with
//! [`WalError::Halted`] until [`Wal::resume`] cuts the log back to its last
//! durable length.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use tessera_common::{Lsn, Timestamp, TxnId};

use crate::config::{SyncPolicy, WalConfig};
use crate::error::{WalError, WalResult};
use crate::reader::{LogScan, WalReader};
use crate::record::payload::{
    CheckpointBeginPayload, CheckpointEndPayload, CommitPayload, CreateTablePayload,
    DropTablePayload, RowPayload,
};
use crate::record::types::{RecordFlags, WalPayload, WalRecord};
use crate::storage::LogStorage;

/// WAL statistics.
#[derive(Debug, Default)]
pub struct WalStats {
    /// Total bytes written.
    pub bytes_written: AtomicU64,
    /// Total records written.
    pub records_written: AtomicU64,
    /// Number of syncs performed.
    pub syncs: AtomicU64,
    /// Number of commit batches.
    pub commits: AtomicU64,
    /// Number of checkpoints.
    pub checkpoints: AtomicU64,
    /// Number of failed writes.
    pub failures: AtomicU64,
}

/// Committed state captured by a checkpoint.
#[derive(Debug, Clone, Default)]
pub struct CheckpointImage {
    /// Table definitions in definition order.
    pub tables: Vec<CreateTablePayload>,
    /// Every committed live row, as an after-image.
    pub rows: Vec<RowPayload>,
    /// Highest commit timestamp reflected in the image.
    pub commit_ts: Timestamp,
}

#[derive(Debug)]
struct WriterState {
    next_lsn: Lsn,
    len: u64,
    durable_len: u64,
    next_checkpoint_id: u64,
}

/// The Write-Ahead Log manager.
pub struct Wal {
    config: WalConfig,
    storage: Arc<dyn LogStorage>,
    state: Mutex<WriterState>,
    halted: AtomicBool,
    last_checkpoint_lsn: AtomicU64,
    stats: WalStats,
}

impl Wal {
    /// Opens the log on `storage`, cutting off any torn tail.
    pub fn open(config: WalConfig, storage: Arc<dyn LogStorage>) -> WalResult<Self> {
        config.validate().map_err(WalError::config_error)?;

        let scan = WalReader::new(storage.read_all()?, config.verify_checksums).scan();
        if scan.has_torn_tail() {
            warn!(
                valid_len = scan.valid_len,
                total_len = scan.total_len,
                reason = ?scan.torn,
                "truncating torn WAL tail"
            );
            storage.truncate(scan.valid_len)?;
        }

        let next_lsn = scan
            .records
            .last()
            .map_or(Lsn::FIRST, |record| record.lsn().next());

        let mut last_checkpoint_lsn = Lsn::INVALID;
        let mut next_checkpoint_id = 1;
        for record in &scan.records {
            if let WalPayload::CheckpointEnd(end) = &record.payload {
                last_checkpoint_lsn = end.begin_lsn;
                next_checkpoint_id = end.checkpoint_id + 1;
            }
        }

        debug!(
            records = scan.records.len(),
            next_lsn = next_lsn.as_u64(),
            "opened WAL"
        );

        Ok(Self {
            config,
            storage,
            state: Mutex::new(WriterState {
                next_lsn,
                len: scan.valid_len,
                durable_len: scan.valid_len,
                next_checkpoint_id,
            }),
            halted: AtomicBool::new(false),
            last_checkpoint_lsn: AtomicU64::new(last_checkpoint_lsn.as_u64()),
            stats: WalStats::default(),
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WalConfig {
        &self.config
    }

    /// Returns the next LSN that will be assigned.
    pub fn next_lsn(&self) -> Lsn {
        self.state.lock().next_lsn
    }

    /// Returns the LSN of the newest complete checkpoint's begin record.
    pub fn last_checkpoint_lsn(&self) -> Lsn {
        Lsn::new(self.last_checkpoint_lsn.load(Ordering::Acquire))
    }

    /// Returns WAL statistics.
    pub fn stats(&self) -> &WalStats {
        &self.stats
    }

    /// Returns true while the log refuses writes after a failure.
    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }

    /// Reads and decodes the whole log.
    pub fn read_all(&self) -> WalResult<LogScan> {
        let _state = self.state.lock();
        Ok(WalReader::new(self.storage.read_all()?, self.config.verify_checksums).scan())
    }

    /// Logs a transaction's row changes followed by its commit record, and
    /// makes them durable.
    pub fn log_commit(
        &self,
        txn_id: TxnId,
        changes: Vec<WalPayload>,
        commit_ts: Timestamp,
    ) -> WalResult<Lsn> {
        let mut entries: Vec<_> = changes
            .into_iter()
            .map(|payload| (txn_id, RecordFlags::empty(), payload))
            .collect();
        entries.push((
            txn_id,
            RecordFlags::empty(),
            WalPayload::Commit(CommitPayload { commit_ts }),
        ));

        let mut state = self.state.lock();
        let lsn = self.append(&mut state, entries)?;
        self.stats.commits.fetch_add(1, Ordering::Relaxed);
        Ok(lsn)
    }

    /// Logs a table definition.
    pub fn log_create_table(&self, payload: CreateTablePayload) -> WalResult<Lsn> {
        let mut state = self.state.lock();
        self.append(
            &mut state,
            vec![(
                TxnId::INVALID,
                RecordFlags::SYSTEM,
                WalPayload::CreateTable(payload),
            )],
        )
    }

    /// Logs a table removal.
    pub fn log_drop_table(&self, payload: DropTablePayload) -> WalResult<Lsn> {
        let mut state = self.state.lock();
        self.append(
            &mut state,
            vec![(
                TxnId::INVALID,
                RecordFlags::SYSTEM,
                WalPayload::DropTable(payload),
            )],
        )
    }

    /// Writes a complete checkpoint and compacts the log to start at it.
    ///
    /// The caller must hold off commits while the image is captured and
    /// written, otherwise the compacted log could lose them.
    pub fn write_checkpoint(&self, image: CheckpointImage) -> WalResult<Lsn> {
        let mut state = self.state.lock();
        let checkpoint_id = state.next_checkpoint_id;
        let begin_lsn = state.next_lsn;
        let begin_offset = state.len;
        let flags = RecordFlags::SYSTEM | RecordFlags::CHECKPOINT;

        let table_count = image.tables.len();
        let row_count = image.rows.len();
        let mut entries = Vec::with_capacity(table_count + row_count + 2);
        entries.push((
            TxnId::INVALID,
            flags,
            WalPayload::CheckpointBegin(CheckpointBeginPayload { checkpoint_id }),
        ));
        entries.extend(
            image
                .tables
                .into_iter()
                .map(|t| (TxnId::INVALID, flags, WalPayload::CreateTable(t))),
        );
        entries.extend(
            image
                .rows
                .into_iter()
                .map(|r| (TxnId::INVALID, flags, WalPayload::Insert(r))),
        );
        entries.push((
            TxnId::INVALID,
            flags,
            WalPayload::CheckpointEnd(CheckpointEndPayload {
                checkpoint_id,
                begin_lsn,
                commit_ts: image.commit_ts,
            }),
        ));

        self.append(&mut state, entries)?;
        state.next_checkpoint_id += 1;

        // Everything before the checkpoint is now redundant
        let result = self.storage.read_all().and_then(|log| {
            let tail = log.slice(begin_offset as usize..);
            self.storage.replace(&tail)?;
            Ok(tail.len() as u64)
        });
        match result {
            Ok(len) => {
                state.len = len;
                state.durable_len = len;
            }
            Err(err) => return Err(self.halt(err)),
        }

        self.last_checkpoint_lsn
            .store(begin_lsn.as_u64(), Ordering::Release);
        self.stats.checkpoints.fetch_add(1, Ordering::Relaxed);
        info!(
            checkpoint_id,
            begin_lsn = begin_lsn.as_u64(),
            tables = table_count,
            rows = row_count,
            "checkpoint written"
        );
        Ok(begin_lsn)
    }

    /// Clears the halted state once storage works again.
    ///
    /// The log is cut back to its last durable length first, so records of
    /// a batch whose commit was reported as failed never replay.
    pub fn resume(&self) -> WalResult<()> {
        let mut state = self.state.lock();
        if !self.is_halted() {
            return Ok(());
        }
        self.storage.truncate(state.durable_len)?;
        state.len = state.durable_len;
        self.halted.store(false, Ordering::Release);
        info!(len = state.durable_len, "WAL resumed");
        Ok(())
    }

    /// Assigns LSNs, writes the batch and syncs according to policy.
    /// Returns the LSN of the last record.
    fn append(
        &self,
        state: &mut WriterState,
        entries: Vec<(TxnId, RecordFlags, WalPayload)>,
    ) -> WalResult<Lsn> {
        if self.is_halted() {
            return Err(WalError::Halted);
        }

        let mut buf = BytesMut::new();
        let mut lsn = state.next_lsn;
        let mut last = Lsn::INVALID;
        let count = entries.len() as u64;
        for (txn_id, flags, payload) in entries {
            let record = WalRecord::new(lsn, txn_id, flags, payload);
            record.serialize_into(&mut buf, self.config.max_record_size)?;
            last = lsn;
            lsn = lsn.next();
        }

        if let Err(err) = self.storage.append(&buf) {
            return Err(self.halt(err));
        }
        state.next_lsn = lsn;
        state.len += buf.len() as u64;

        match self.config.sync_policy {
            SyncPolicy::EveryCommit => {
                if let Err(err) = self.storage.sync() {
                    return Err(self.halt(err));
                }
                self.stats.syncs.fetch_add(1, Ordering::Relaxed);
            }
            SyncPolicy::Never => {}
        }
        state.durable_len = state.len;

        self.stats
            .bytes_written
            .fetch_add(buf.len() as u64, Ordering::Relaxed);
        self.stats
            .records_written
            .fetch_add(count, Ordering::Relaxed);
        Ok(last)
    }

    fn halt(&self, err: WalError) -> WalError {
        self.halted.store(true, Ordering::Release);
        self.stats.failures.fetch_add(1, Ordering::Relaxed);
        error!(error = %err, "WAL write failed, halting new commits");
        err
    }
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("config", &self.config)
            .field("storage", &self.storage)
            .field("next_lsn", &self.next_lsn())
            .field("last_checkpoint_lsn", &self.last_checkpoint_lsn())
            .field("halted", &self.is_halted())
            .finish()
    }
}
