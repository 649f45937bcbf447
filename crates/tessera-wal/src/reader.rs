//! Sequential WAL reader.
//!
//! The log is read front to back. The first record that fails to decode
//! (short header, bad magic, short payload or checksum mismatch) ends the
//! scan; recovery treats everything from that offset on as a torn tail.

use bytes::Bytes;

use crate::error::WalError;
use crate::record::header::RecordHeader;
use crate::record::types::WalRecord;

/// Iterator over the records of a log image.
pub struct WalReader {
    data: Bytes,
    offset: usize,
    verify_checksums: bool,
    failed: bool,
}

impl WalReader {
    /// Creates a reader over a full log image.
    pub fn new(data: Bytes, verify_checksums: bool) -> Self {
        Self {
            data,
            offset: 0,
            verify_checksums,
            failed: false,
        }
    }

    /// Byte offset just past the last record returned.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Reads every valid record and reports where the valid prefix ends.
    pub fn scan(mut self) -> LogScan {
        let mut records = Vec::new();
        let mut offsets = Vec::new();
        let mut torn = None;

        loop {
            let start = self.offset;
            match self.next() {
                Some(Ok(record)) => {
                    offsets.push(start as u64);
                    records.push(record);
                }
                Some(Err(err)) => {
                    torn = Some(err);
                    break;
                }
                None => break,
            }
        }

        LogScan {
            valid_len: self.offset as u64,
            total_len: self.data.len() as u64,
            records,
            offsets,
            torn,
        }
    }
}

impl Iterator for WalReader {
    type Item = Result<WalRecord, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.data.len() {
            return None;
        }

        let remaining = &self.data[self.offset..];
        match WalRecord::deserialize(remaining, self.offset as u64, self.verify_checksums) {
            Ok(record) => {
                self.offset += RecordHeader::SIZE + record.header.payload_length as usize;
                Some(Ok(record))
            }
            Err(err) => {
                self.failed = true;
                Some(Err(err))
            }
        }
    }
}

/// Result of scanning a whole log image.
#[derive(Debug)]
pub struct LogScan {
    /// Records in log order.
    pub records: Vec<WalRecord>,
    /// Starting byte offset of each record in `records`.
    pub offsets: Vec<u64>,
    /// Length of the valid prefix.
    pub valid_len: u64,
    /// Total length of the scanned image.
    pub total_len: u64,
    /// Error that ended the scan early, if any.
    pub torn: Option<WalError>,
}

impl LogScan {
    /// Returns true if bytes past the valid prefix must be discarded.
    pub fn has_torn_tail(&self) -> bool {
        self.valid_len < self.total_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::payload::CommitPayload;
    use crate::record::types::{RecordFlags, WalPayload};
    use bytes::BytesMut;
    use tessera_common::{Lsn, Timestamp, TxnId};

    fn commit(lsn: u64) -> WalRecord {
        WalRecord::new(
            Lsn::new(lsn),
            TxnId::new(lsn),
            RecordFlags::empty(),
            WalPayload::Commit(CommitPayload {
                commit_ts: Timestamp::new(lsn),
            }),
        )
    }

    fn image(records: &[WalRecord]) -> BytesMut {
        let mut buf = BytesMut::new();
        for record in records {
            record.serialize_into(&mut buf, 1 << 20).unwrap();
        }
        buf
    }

    #[test]
    fn test_scan_clean_log() {
        let buf = image(&[commit(1), commit(2), commit(3)]);
        let scan = WalReader::new(buf.freeze(), true).scan();

        assert_eq!(scan.records.len(), 3);
        assert_eq!(scan.offsets[0], 0);
        assert!(!scan.has_torn_tail());
        assert!(scan.torn.is_none());
    }

    #[test]
    fn test_scan_stops_at_partial_record() {
        let buf = image(&[commit(1), commit(2)]);
        let full = buf.len();
        let cut = buf.freeze().slice(..full - 3);

        let scan = WalReader::new(cut, true).scan();
        assert_eq!(scan.records.len(), 1);
        assert!(scan.has_torn_tail());
        assert_eq!(scan.valid_len as usize, full / 2);
    }

    #[test]
    fn test_scan_stops_at_checksum_mismatch() {
        let mut buf = image(&[commit(1), commit(2), commit(3)]);
        let record_len = buf.len() / 3;
        // Flip a payload byte of the second record
        buf[2 * record_len - 1] ^= 0x55;

        let scan = WalReader::new(buf.freeze(), true).scan();
        assert_eq!(scan.records.len(), 1);
        assert!(matches!(scan.torn, Some(WalError::ChecksumMismatch { .. })));
        assert_eq!(scan.valid_len as usize, record_len);
    }
}
