//! Fixed-size record header.
//!
//! ```text
//!  0        4        8                16               24   25   26   28       32
//!  +--------+--------+----------------+----------------+----+----+----+--------+
//!  | magic  | length |      lsn       |     txn_id     |type|flag| -- |  crc32 |
//!  +--------+--------+----------------+----------------+----+----+----+--------+
//! ```
//!
//! All integers are little-endian, like the payload codec. The checksum
//! covers the first 28 encoded bytes followed by the payload, so a flipped
//! bit anywhere in a record is caught.

use bytes::{Buf, BufMut};
use tessera_common::constants::{WAL_MAGIC, WAL_RECORD_HEADER_SIZE};
use tessera_common::{Lsn, TxnId};

use super::types::{RecordFlags, RecordType};
use crate::error::{WalError, WalResult};

/// Header bytes covered by the checksum.
const CHECKED_LEN: usize = WAL_RECORD_HEADER_SIZE - 4;

/// Header preceding every record payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Position of the record in the log.
    pub lsn: Lsn,
    /// Writer, or `TxnId::INVALID` for engine records.
    pub txn_id: TxnId,
    /// Payload kind.
    pub record_type: RecordType,
    /// Record flags.
    pub flags: RecordFlags,
    /// Payload size in bytes.
    pub payload_length: u32,
    /// CRC32 over the header fields and the payload.
    pub checksum: u32,
}

impl RecordHeader {
    /// Encoded size.
    pub const SIZE: usize = WAL_RECORD_HEADER_SIZE;

    /// Creates an unsealed header for an empty payload.
    pub fn new(lsn: Lsn, txn_id: TxnId, record_type: RecordType, flags: RecordFlags) -> Self {
        Self {
            lsn,
            txn_id,
            record_type,
            flags,
            payload_length: 0,
            checksum: 0,
        }
    }

    /// Fixes the payload length and checksum for `payload`.
    pub fn seal(&mut self, payload: &[u8]) {
        self.payload_length = payload.len() as u32;
        self.checksum = self.checksum_of(payload);
    }

    /// Returns true if `payload` matches the sealed checksum.
    pub fn is_intact(&self, payload: &[u8]) -> bool {
        self.checksum == self.checksum_of(payload)
    }

    /// Checksum this header would carry for `payload`.
    pub fn checksum_of(&self, payload: &[u8]) -> u32 {
        let mut fields = [0u8; CHECKED_LEN];
        self.put_fields(&mut &mut fields[..]);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&fields);
        hasher.update(payload);
        hasher.finalize()
    }

    /// Header plus payload size.
    pub fn record_len(&self) -> usize {
        Self::SIZE + self.payload_length as usize
    }

    /// Appends the encoded header to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        self.put_fields(buf);
        buf.put_u32_le(self.checksum);
    }

    /// Reads a header, rejecting a wrong magic number.
    ///
    /// `offset` is the record's position in the log, for error reports.
    pub fn decode(buf: &mut impl Buf, offset: u64) -> WalResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(WalError::deserialization_error(format!(
                "header needs {} bytes, {} left at offset {offset}",
                Self::SIZE,
                buf.remaining()
            )));
        }

        let magic = buf.get_u32_le();
        if magic != WAL_MAGIC {
            return Err(WalError::InvalidMagic {
                offset,
                found: magic,
            });
        }
        let payload_length = buf.get_u32_le();
        let lsn = Lsn::new(buf.get_u64_le());
        let txn_id = TxnId::new(buf.get_u64_le());
        let record_type = RecordType::from_u8(buf.get_u8())?;
        let flags = RecordFlags::from_bits_truncate(buf.get_u8());
        buf.advance(2);
        let checksum = buf.get_u32_le();

        Ok(Self {
            lsn,
            txn_id,
            record_type,
            flags,
            payload_length,
            checksum,
        })
    }

    fn put_fields(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(WAL_MAGIC);
        buf.put_u32_le(self.payload_length);
        buf.put_u64_le(self.lsn.as_u64());
        buf.put_u64_le(self.txn_id.as_u64());
        buf.put_u8(self.record_type.as_u8());
        buf.put_u8(self.flags.bits());
        buf.put_u16_le(0);
    }
}
