//! Checkpoint images.

use bytes::Bytes;

use tessera_common::Timestamp;
use tessera_sql::storage::{RowCodec, StorageEngine};
use tessera_wal::{CheckpointImage, CreateTablePayload, RowPayload};

use super::error::{DatabaseError, DatabaseResult};

/// Captures every table definition and committed live row.
///
/// Commits and DDL must be held off while the image is captured and
/// written.
pub(crate) fn capture(storage: &StorageEngine, commit_ts: Timestamp) -> DatabaseResult<CheckpointImage> {
    let mut tables = Vec::new();
    let mut rows = Vec::new();

    for (info, committed) in storage.committed_image() {
        tables.push(CreateTablePayload {
            table: info.name().to_string(),
            definition: Bytes::from(info.schema.to_json()?),
        });
        for row in committed {
            let row_id = row.id().ok_or_else(|| {
                DatabaseError::Internal(format!("committed row of {} without an id", info.name()))
            })?;
            rows.push(RowPayload {
                table: info.name().to_string(),
                row_id,
                before: None,
                after: Some(RowCodec::encode(row.values())),
            });
        }
    }

    Ok(CheckpointImage {
        tables,
        rows,
        commit_ts,
    })
}
