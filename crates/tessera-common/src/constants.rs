//! System-wide constants for Tessera.

// =============================================================================
// WAL Constants
// =============================================================================

/// Magic number at the start of every WAL record header.
pub const WAL_MAGIC: u32 = 0x5453_574C; // "TSWL" in ASCII

/// WAL record header size.
///
/// Contains: magic (4), payload length (4), lsn (8), txn_id (8), type (1),
/// flags (1), reserved (2), checksum (4) = 32 bytes.
pub const WAL_RECORD_HEADER_SIZE: usize = 32;

/// Maximum WAL record payload size (16 MB).
pub const MAX_WAL_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// File name of the log inside the data directory.
pub const WAL_FILE_NAME: &str = "tessera.wal";

// =============================================================================
// Transaction Constants
// =============================================================================

/// Lock acquisition timeout (default).
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

/// Maximum number of concurrent transactions.
pub const MAX_CONCURRENT_TRANSACTIONS: usize = 65_536;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wal_constants() {
        assert_eq!(WAL_RECORD_HEADER_SIZE % 8, 0);
        assert!(MAX_WAL_RECORD_SIZE > WAL_RECORD_HEADER_SIZE);
        assert_eq!(&WAL_MAGIC.to_be_bytes(), b"TSWL");
    }
}
