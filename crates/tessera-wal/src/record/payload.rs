//! WAL record payloads.
//!
//! Strings and images are length-prefixed with a u32. Optional images carry
//! a presence byte in front of the length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tessera_common::{Lsn, RowId, Timestamp};

use crate::error::{WalError, WalResult};

/// Trait for serializable payloads.
pub trait Payload: Sized {
    /// Serializes the payload to bytes.
    fn serialize(&self) -> WalResult<Bytes>;
    /// Deserializes the payload from bytes.
    fn deserialize(bytes: &[u8]) -> WalResult<Self>;
}

fn put_len_prefixed(buf: &mut BytesMut, data: &[u8]) {
    buf.put_u32(data.len() as u32);
    buf.extend_from_slice(data);
}

fn get_len_prefixed(buf: &mut &[u8], what: &str) -> WalResult<Bytes> {
    if buf.remaining() < 4 {
        return Err(WalError::deserialization_error(format!(
            "{} length truncated",
            what
        )));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(WalError::deserialization_error(format!(
            "{} truncated: {} < {}",
            what,
            buf.remaining(),
            len
        )));
    }
    let data = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(data)
}

fn get_string(buf: &mut &[u8], what: &str) -> WalResult<String> {
    let raw = get_len_prefixed(buf, what)?;
    String::from_utf8(raw.to_vec())
        .map_err(|_| WalError::deserialization_error(format!("{} is not valid UTF-8", what)))
}

fn put_image(buf: &mut BytesMut, image: &Option<Bytes>) {
    match image {
        Some(data) => {
            buf.put_u8(1);
            put_len_prefixed(buf, data);
        }
        None => buf.put_u8(0),
    }
}

fn get_image(buf: &mut &[u8], what: &str) -> WalResult<Option<Bytes>> {
    if buf.remaining() < 1 {
        return Err(WalError::deserialization_error(format!(
            "{} presence byte missing",
            what
        )));
    }
    match buf.get_u8() {
        0 => Ok(None),
        1 => get_len_prefixed(buf, what).map(Some),
        other => Err(WalError::deserialization_error(format!(
            "{} has invalid presence byte {}",
            what, other
        ))),
    }
}

fn get_u64(buf: &mut &[u8], what: &str) -> WalResult<u64> {
    if buf.remaining() < 8 {
        return Err(WalError::deserialization_error(format!("{} too short", what)));
    }
    Ok(buf.get_u64())
}

/// Row change payload, shared by insert, update and delete records.
///
/// Inserts carry only an after-image, deletes only a before-image, updates
/// both. Images are opaque encoded rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowPayload {
    /// Table the row belongs to.
    pub table: String,
    /// Row identifier.
    pub row_id: RowId,
    /// Row contents before the change.
    pub before: Option<Bytes>,
    /// Row contents after the change.
    pub after: Option<Bytes>,
}

impl Payload for RowPayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let size = 4
            + self.table.len()
            + 8
            + 5
            + self.before.as_ref().map_or(0, Bytes::len)
            + 5
            + self.after.as_ref().map_or(0, Bytes::len);
        let mut buf = BytesMut::with_capacity(size);

        put_len_prefixed(&mut buf, self.table.as_bytes());
        buf.put_u64(self.row_id.as_u64());
        put_image(&mut buf, &self.before);
        put_image(&mut buf, &self.after);

        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let table = get_string(&mut buf, "RowPayload table")?;
        let row_id = RowId::new(get_u64(&mut buf, "RowPayload row id")?);
        let before = get_image(&mut buf, "RowPayload before-image")?;
        let after = get_image(&mut buf, "RowPayload after-image")?;

        Ok(Self {
            table,
            row_id,
            before,
            after,
        })
    }
}

/// Commit record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitPayload {
    /// Commit timestamp issued by the commit clock.
    pub commit_ts: Timestamp,
}

impl Payload for CommitPayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(self.commit_ts.as_u64());
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        Ok(Self {
            commit_ts: Timestamp::new(get_u64(&mut buf, "CommitPayload")?),
        })
    }
}

/// Table definition payload. The definition is an opaque serialized schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTablePayload {
    /// Table name.
    pub table: String,
    /// Serialized table schema.
    pub definition: Bytes,
}

impl Payload for CreateTablePayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(8 + self.table.len() + self.definition.len());
        put_len_prefixed(&mut buf, self.table.as_bytes());
        put_len_prefixed(&mut buf, &self.definition);
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let table = get_string(&mut buf, "CreateTablePayload table")?;
        let definition = get_len_prefixed(&mut buf, "CreateTablePayload definition")?;
        Ok(Self { table, definition })
    }
}

/// Table removal payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropTablePayload {
    /// Table name.
    pub table: String,
    /// Whether dependent foreign keys were removed along with the table.
    pub cascade: bool,
}

impl Payload for DropTablePayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(5 + self.table.len());
        put_len_prefixed(&mut buf, self.table.as_bytes());
        buf.put_u8(u8::from(self.cascade));
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        let table = get_string(&mut buf, "DropTablePayload table")?;
        if buf.remaining() < 1 {
            return Err(WalError::deserialization_error(
                "DropTablePayload cascade flag missing",
            ));
        }
        let cascade = buf.get_u8() != 0;
        Ok(Self { table, cascade })
    }
}

/// Checkpoint begin payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointBeginPayload {
    /// Checkpoint ID.
    pub checkpoint_id: u64,
}

impl Payload for CheckpointBeginPayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(8);
        buf.put_u64(self.checkpoint_id);
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        Ok(Self {
            checkpoint_id: get_u64(&mut buf, "CheckpointBeginPayload")?,
        })
    }
}

/// Checkpoint end payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointEndPayload {
    /// Checkpoint ID (matches begin).
    pub checkpoint_id: u64,
    /// LSN of the checkpoint begin record.
    pub begin_lsn: Lsn,
    /// Highest commit timestamp included in the checkpoint image.
    pub commit_ts: Timestamp,
}

impl Payload for CheckpointEndPayload {
    fn serialize(&self) -> WalResult<Bytes> {
        let mut buf = BytesMut::with_capacity(24);
        buf.put_u64(self.checkpoint_id);
        buf.put_u64(self.begin_lsn.as_u64());
        buf.put_u64(self.commit_ts.as_u64());
        Ok(buf.freeze())
    }

    fn deserialize(bytes: &[u8]) -> WalResult<Self> {
        let mut buf = bytes;
        Ok(Self {
            checkpoint_id: get_u64(&mut buf, "CheckpointEndPayload id")?,
            begin_lsn: Lsn::new(get_u64(&mut buf, "CheckpointEndPayload begin LSN")?),
            commit_ts: Timestamp::new(get_u64(&mut buf, "CheckpointEndPayload commit ts")?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_payload_images() {
        let update = RowPayload {
            table: "orders".to_string(),
            row_id: RowId::new(7),
            before: Some(Bytes::from_static(b"old")),
            after: Some(Bytes::from_static(b"new")),
        };
        let decoded = RowPayload::deserialize(&update.serialize().unwrap()).unwrap();
        assert_eq!(decoded, update);

        let delete = RowPayload {
            table: "orders".to_string(),
            row_id: RowId::new(7),
            before: Some(Bytes::from_static(b"old")),
            after: None,
        };
        let decoded = RowPayload::deserialize(&delete.serialize().unwrap()).unwrap();
        assert!(decoded.after.is_none());
        assert_eq!(decoded.before.as_deref(), Some(&b"old"[..]));
    }

    #[test]
    fn test_row_payload_truncated() {
        let payload = RowPayload {
            table: "t".to_string(),
            row_id: RowId::new(1),
            before: None,
            after: Some(Bytes::from_static(b"abcdef")),
        };
        let bytes = payload.serialize().unwrap();
        let err = RowPayload::deserialize(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_drop_table_payload() {
        let payload = DropTablePayload {
            table: "customers".to_string(),
            cascade: true,
        };
        let decoded = DropTablePayload::deserialize(&payload.serialize().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_checkpoint_end_payload() {
        let payload = CheckpointEndPayload {
            checkpoint_id: 3,
            begin_lsn: Lsn::new(40),
            commit_ts: Timestamp::new(12),
        };
        let decoded = CheckpointEndPayload::deserialize(&payload.serialize().unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert!(CheckpointEndPayload::deserialize(&[0u8; 10]).is_err());
    }
}
