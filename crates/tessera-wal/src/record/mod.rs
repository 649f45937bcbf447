//! WAL record types and serialization.
//!
//! Records are serialized with a fixed-size header followed by a
//! variable-length payload.

pub mod header;
pub mod payload;
pub mod types;

pub use header::RecordHeader;
pub use payload::{
    CheckpointBeginPayload, CheckpointEndPayload, CommitPayload, CreateTablePayload,
    DropTablePayload, Payload, RowPayload,
};
pub use types::{RecordFlags, RecordType, WalPayload, WalRecord};
