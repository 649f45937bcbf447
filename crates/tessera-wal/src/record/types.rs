//! WAL record types and flags.

use bytes::{Buf, Bytes, BytesMut};
use tessera_common::{Lsn, TxnId};

use super::header::RecordHeader;
use super::payload::*;
use crate::error::{WalError, WalResult};

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Insert a new row.
    Insert = 1,
    /// Replace a row's contents.
    Update = 2,
    /// Delete a row.
    Delete = 3,
    /// Transaction commit.
    Commit = 4,
    /// Begin checkpoint.
    CheckpointBegin = 5,
    /// End checkpoint.
    CheckpointEnd = 6,
    /// Table definition.
    CreateTable = 7,
    /// Table removal.
    DropTable = 8,
}

impl RecordType {
    /// Converts the record type to a u8.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Creates a record type from a u8.
    pub fn from_u8(value: u8) -> WalResult<Self> {
        match value {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Update),
            3 => Ok(Self::Delete),
            4 => Ok(Self::Commit),
            5 => Ok(Self::CheckpointBegin),
            6 => Ok(Self::CheckpointEnd),
            7 => Ok(Self::CreateTable),
            8 => Ok(Self::DropTable),
            _ => Err(WalError::deserialization_error(format!(
                "unknown record type: {}",
                value
            ))),
        }
    }

    /// Returns true if this record type changes a row.
    pub const fn is_row_change(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Returns true if this record type is a checkpoint record.
    pub const fn is_checkpoint_record(self) -> bool {
        matches!(self, Self::CheckpointBegin | Self::CheckpointEnd)
    }
}

bitflags::bitflags! {
    /// Flags for WAL records.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RecordFlags: u8 {
        /// Written by the engine itself; applies without a commit record.
        const SYSTEM = 0b0000_0001;
        /// Part of a checkpoint image.
        const CHECKPOINT = 0b0000_0010;
    }
}

/// A complete WAL record with header and typed payload.
#[derive(Debug, Clone)]
pub struct WalRecord {
    /// Record header.
    pub header: RecordHeader,
    /// Record payload.
    pub payload: WalPayload,
}

/// WAL record payload variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalPayload {
    /// Row insert.
    Insert(RowPayload),
    /// Row update.
    Update(RowPayload),
    /// Row delete.
    Delete(RowPayload),
    /// Transaction commit.
    Commit(CommitPayload),
    /// Checkpoint begin.
    CheckpointBegin(CheckpointBeginPayload),
    /// Checkpoint end.
    CheckpointEnd(CheckpointEndPayload),
    /// Table definition.
    CreateTable(CreateTablePayload),
    /// Table removal.
    DropTable(DropTablePayload),
}

impl WalPayload {
    /// Returns the record type for this payload.
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Insert(_) => RecordType::Insert,
            Self::Update(_) => RecordType::Update,
            Self::Delete(_) => RecordType::Delete,
            Self::Commit(_) => RecordType::Commit,
            Self::CheckpointBegin(_) => RecordType::CheckpointBegin,
            Self::CheckpointEnd(_) => RecordType::CheckpointEnd,
            Self::CreateTable(_) => RecordType::CreateTable,
            Self::DropTable(_) => RecordType::DropTable,
        }
    }

    /// Returns the row change carried by this payload, if any.
    pub fn as_row_change(&self) -> Option<&RowPayload> {
        match self {
            Self::Insert(p) | Self::Update(p) | Self::Delete(p) => Some(p),
            _ => None,
        }
    }

    fn serialize(&self) -> WalResult<Bytes> {
        match self {
            Self::Insert(p) | Self::Update(p) | Self::Delete(p) => p.serialize(),
            Self::Commit(p) => p.serialize(),
            Self::CheckpointBegin(p) => p.serialize(),
            Self::CheckpointEnd(p) => p.serialize(),
            Self::CreateTable(p) => p.serialize(),
            Self::DropTable(p) => p.serialize(),
        }
    }

    fn deserialize(record_type: RecordType, bytes: &[u8]) -> WalResult<Self> {
        Ok(match record_type {
            RecordType::Insert => Self::Insert(RowPayload::deserialize(bytes)?),
            RecordType::Update => Self::Update(RowPayload::deserialize(bytes)?),
            RecordType::Delete => Self::Delete(RowPayload::deserialize(bytes)?),
            RecordType::Commit => Self::Commit(CommitPayload::deserialize(bytes)?),
            RecordType::CheckpointBegin => {
                Self::CheckpointBegin(CheckpointBeginPayload::deserialize(bytes)?)
            }
            RecordType::CheckpointEnd => {
                Self::CheckpointEnd(CheckpointEndPayload::deserialize(bytes)?)
            }
            RecordType::CreateTable => Self::CreateTable(CreateTablePayload::deserialize(bytes)?),
            RecordType::DropTable => Self::DropTable(DropTablePayload::deserialize(bytes)?),
        })
    }
}

impl WalRecord {
    /// Creates a record. The header is sealed by [`WalRecord::serialize_into`].
    pub fn new(lsn: Lsn, txn_id: TxnId, flags: RecordFlags, payload: WalPayload) -> Self {
        let header = RecordHeader::new(lsn, txn_id, payload.record_type(), flags);
        Self { header, payload }
    }

    /// Returns the LSN of this record.
    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// Returns the transaction ID of this record.
    pub fn txn_id(&self) -> TxnId {
        self.header.txn_id
    }

    /// Returns the record type.
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    /// Returns true if the record was written by the engine itself.
    pub fn is_system(&self) -> bool {
        self.header.flags.contains(RecordFlags::SYSTEM)
    }

    /// Serializes the entire record (header + payload), appending to `buf`.
    ///
    /// Returns the number of bytes written.
    pub fn serialize_into(&self, buf: &mut BytesMut, max_payload: usize) -> WalResult<usize> {
        let payload_bytes = self.payload.serialize()?;
        if payload_bytes.len() > max_payload {
            return Err(WalError::record_too_large(payload_bytes.len(), max_payload));
        }

        let mut header = self.header;
        header.seal(&payload_bytes);

        buf.reserve(header.record_len());
        header.encode(buf);
        buf.extend_from_slice(&payload_bytes);
        Ok(header.record_len())
    }

    /// Deserializes a record from bytes.
    pub fn deserialize(mut buf: impl Buf, offset: u64, verify_checksum: bool) -> WalResult<Self> {
        let header = RecordHeader::decode(&mut buf, offset)?;

        if buf.remaining() < header.payload_length as usize {
            return Err(WalError::deserialization_error(format!(
                "not enough bytes for payload: {} < {}",
                buf.remaining(),
                header.payload_length
            )));
        }

        let payload_bytes = buf.copy_to_bytes(header.payload_length as usize);
        if verify_checksum && !header.is_intact(&payload_bytes) {
            return Err(WalError::checksum_mismatch(
                header.lsn,
                header.checksum,
                header.checksum_of(&payload_bytes),
            ));
        }
        let payload = WalPayload::deserialize(header.record_type, &payload_bytes)?;

        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_common::{RowId, Timestamp};

    fn encode(record: &WalRecord) -> BytesMut {
        let mut buf = BytesMut::new();
        record.serialize_into(&mut buf, 1 << 20).unwrap();
        buf
    }

    #[test]
    fn test_record_type_codes() {
        for rt in [
            RecordType::Insert,
            RecordType::Update,
            RecordType::Delete,
            RecordType::Commit,
            RecordType::CheckpointBegin,
            RecordType::CheckpointEnd,
            RecordType::CreateTable,
            RecordType::DropTable,
        ] {
            assert_eq!(RecordType::from_u8(rt.as_u8()).unwrap(), rt);
        }
        assert!(RecordType::from_u8(0).is_err());
        assert!(RecordType::from_u8(255).is_err());
        assert!(RecordType::Delete.is_row_change());
        assert!(!RecordType::Commit.is_row_change());
    }

    #[test]
    fn test_commit_record() {
        let record = WalRecord::new(
            Lsn::new(10),
            TxnId::new(42),
            RecordFlags::empty(),
            WalPayload::Commit(CommitPayload {
                commit_ts: Timestamp::new(5),
            }),
        );

        let bytes = encode(&record);
        let decoded = WalRecord::deserialize(&bytes[..], 0, true).unwrap();

        assert_eq!(decoded.lsn(), Lsn::new(10));
        assert_eq!(decoded.txn_id(), TxnId::new(42));
        assert_eq!(decoded.record_type(), RecordType::Commit);
        assert!(!decoded.is_system());
        assert_eq!(decoded.payload, record.payload);
    }

    #[test]
    fn test_corrupted_payload_detected() {
        let record = WalRecord::new(
            Lsn::new(3),
            TxnId::new(1),
            RecordFlags::empty(),
            WalPayload::Insert(RowPayload {
                table: "t".to_string(),
                row_id: RowId::new(1),
                before: None,
                after: Some(Bytes::from_static(b"payload")),
            }),
        );

        let mut bytes = encode(&record);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        let err = WalRecord::deserialize(&bytes[..], 0, true).unwrap_err();
        assert!(matches!(err, WalError::ChecksumMismatch { .. }));

        // Without verification the flipped byte goes unnoticed
        assert!(WalRecord::deserialize(&bytes[..], 0, false).is_ok());
    }

    #[test]
    fn test_record_too_large() {
        let record = WalRecord::new(
            Lsn::new(1),
            TxnId::INVALID,
            RecordFlags::SYSTEM,
            WalPayload::CreateTable(CreateTablePayload {
                table: "big".to_string(),
                definition: Bytes::from(vec![0u8; 4096]),
            }),
        );
        let mut buf = BytesMut::new();
        let err = record.serialize_into(&mut buf, 1024).unwrap_err();
        assert!(matches!(err, WalError::RecordTooLarge { .. }));
        assert!(buf.is_empty());
    }
}
