//! # tessera-wal
//!
//! Write-ahead logging for Tessera.
//!
//! The log is a single append-only byte stream behind the [`LogStorage`]
//! trait. Every committed transaction is appended as one batch (its row
//! changes followed by a commit record) and synced before the commit is
//! acknowledged. DDL is logged as system records, and checkpoints rewrite the
//! log so that recovery starts from the newest complete checkpoint.
//!
//! ## Record Format
//!
//! Each record is a 32-byte header followed by a variable-length payload:
//!
//! ```text
//! +-----------+----------+-----------+------+-------+----------+--------+----------+
//! | Magic (4) | LSN (8)  | TxnId (8) | Type | Flags | Reserved | Length | Checksum |
//! +-----------+----------+-----------+------+-------+----------+--------+----------+
//! |                              Payload (variable)                                |
//! +--------------------------------------------------------------------------------+
//! ```
//!
//! A record whose header or checksum does not validate marks the end of the
//! log: everything from it onwards is a torn tail and is truncated on open.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod error;

/// WAL record types and serialization.
pub mod record;

/// Byte-level log storage backends.
pub mod storage;

/// Sequential log reader.
pub mod reader;

/// Main WAL manager.
pub mod wal;

pub use config::{SyncPolicy, WalConfig};
pub use error::{WalError, WalResult};
pub use reader::{LogScan, WalReader};
pub use record::{
    CheckpointBeginPayload, CheckpointEndPayload, CommitPayload, CreateTablePayload,
    DropTablePayload, Payload, RecordFlags, RecordHeader, RecordType, RowPayload, WalPayload,
    WalRecord,
};
pub use storage::{FileLogStorage, LogStorage, MemoryLogStorage};
pub use wal::{CheckpointImage, Wal, WalStats};
