//! WAL error types.

use std::io;
use thiserror::Error;

use tessera_common::Lsn;

/// Result type for WAL operations.
pub type WalResult<T> = Result<T, WalError>;

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// I/O error from the underlying storage.
    #[error("WAL I/O error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: io::Error,
    },

    /// Invalid record magic number.
    #[error("invalid WAL record magic at offset {offset}: found {found:#010x}")]
    InvalidMagic {
        /// Byte offset of the record.
        offset: u64,
        /// The value found instead of the magic.
        found: u32,
    },

    /// Record checksum mismatch.
    #[error("WAL record checksum mismatch at LSN {lsn}: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// LSN claimed by the damaged record.
        lsn: Lsn,
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the record.
        computed: u32,
    },

    /// Record too large.
    #[error("WAL record too large: {size} bytes exceeds maximum {max} bytes")]
    RecordTooLarge {
        /// Payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Record payload could not be decoded.
    #[error("failed to deserialize WAL record: {reason}")]
    DeserializationError {
        /// What went wrong.
        reason: String,
    },

    /// An earlier write or sync failed; the log accepts nothing until resumed.
    #[error("WAL halted after a failed write; storage must be restored before new commits")]
    Halted,

    /// Storage rejected a write (injected or reported failure).
    #[error("WAL storage unavailable: {reason}")]
    StorageUnavailable {
        /// Description of the failure.
        reason: String,
    },

    /// Configuration error.
    #[error("WAL configuration error: {reason}")]
    ConfigError {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl WalError {
    /// Creates a checksum mismatch error.
    pub fn checksum_mismatch(lsn: Lsn, expected: u32, computed: u32) -> Self {
        Self::ChecksumMismatch {
            lsn,
            expected,
            computed,
        }
    }

    /// Creates a record too large error.
    pub fn record_too_large(size: usize, max: usize) -> Self {
        Self::RecordTooLarge { size, max }
    }

    /// Creates a deserialization error.
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::DeserializationError {
            reason: reason.into(),
        }
    }

    /// Creates a storage unavailable error.
    pub fn storage_unavailable(reason: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a config error.
    pub fn config_error(reason: impl Into<String>) -> Self {
        Self::ConfigError {
            reason: reason.into(),
        }
    }

    /// Returns true if this error means the log could not be made durable.
    pub fn is_durability_failure(&self) -> bool {
        matches!(
            self,
            Self::Io { .. } | Self::Halted | Self::StorageUnavailable { .. }
        )
    }

    /// Returns true if this is a corruption error.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. }
                | Self::InvalidMagic { .. }
                | Self::DeserializationError { .. }
        )
    }
}
