//! Byte-level storage for the log.
//!
//! The WAL only needs an append-only byte stream with an explicit sync
//! point, so storage is abstracted behind [`LogStorage`]:
//!
//! - [`FileLogStorage`]: a single file, synced with `fdatasync`
//! - [`MemoryLogStorage`]: an in-memory buffer that remembers which prefix was
//!   synced, so tests can simulate a crash and inject write failures
//!
//! # Durability Guarantees
//!
//! - Bytes are durable only after `sync` returns
//! - `replace` is atomic for file storage (written to a temp file, then renamed)

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{WalError, WalResult};

/// Abstract durable byte stream backing the WAL.
pub trait LogStorage: Send + Sync + fmt::Debug {
    /// Appends bytes at the end of the log.
    fn append(&self, data: &[u8]) -> WalResult<()>;

    /// Makes every appended byte durable.
    fn sync(&self) -> WalResult<()>;

    /// Reads the whole log.
    fn read_all(&self) -> WalResult<Bytes>;

    /// Returns the current length in bytes.
    fn len(&self) -> WalResult<u64>;

    /// Returns true if the log is empty.
    fn is_empty(&self) -> WalResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Cuts the log back to `len` bytes and syncs.
    fn truncate(&self, len: u64) -> WalResult<()>;

    /// Atomically replaces the whole log with `contents`, durably.
    fn replace(&self, contents: &[u8]) -> WalResult<()>;
}

// =============================================================================
// File storage
// =============================================================================

/// Single-file log storage.
pub struct FileLogStorage {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogStorage {
    /// Opens (creating if needed) the log file at `path`.
    pub fn open(path: impl AsRef<Path>) -> WalResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = Self::open_file(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Returns the path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_file(path: &Path) -> WalResult<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.seek(SeekFrom::End(0))?;
        Ok(file)
    }
}

impl LogStorage for FileLogStorage {
    fn append(&self, data: &[u8]) -> WalResult<()> {
        let mut file = self.file.lock();
        file.write_all(data)?;
        Ok(())
    }

    fn sync(&self) -> WalResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn read_all(&self) -> WalResult<Bytes> {
        let _guard = self.file.lock();
        Ok(Bytes::from(std::fs::read(&self.path)?))
    }

    fn len(&self) -> WalResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> WalResult<()> {
        let mut file = self.file.lock();
        file.set_len(len)?;
        file.seek(SeekFrom::End(0))?;
        file.sync_all()?;
        Ok(())
    }

    fn replace(&self, contents: &[u8]) -> WalResult<()> {
        let mut file = self.file.lock();
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(contents)?;
            tmp.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        *file = Self::open_file(&self.path)?;
        Ok(())
    }
}

impl fmt::Debug for FileLogStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileLogStorage")
            .field("path", &self.path)
            .finish()
    }
}

// =============================================================================
// Memory storage
// =============================================================================

#[derive(Debug, Default)]
struct MemoryLog {
    data: Vec<u8>,
    synced: usize,
}

/// In-memory log storage.
///
/// Clones share the same buffer, so a test can keep a handle, drop the
/// database, call [`MemoryLogStorage::crash`] and reopen on the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryLogStorage {
    log: Arc<Mutex<MemoryLog>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryLogStorage {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every byte that was appended but never synced.
    pub fn crash(&self) {
        let mut log = self.log.lock();
        let synced = log.synced;
        log.data.truncate(synced);
    }

    /// Makes appends and syncs fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Release);
    }

    /// Returns the number of durable bytes.
    pub fn synced_len(&self) -> usize {
        self.log.lock().synced
    }

    /// Overwrites one byte of the log, for corruption tests.
    pub fn corrupt_byte(&self, offset: usize) {
        let mut log = self.log.lock();
        if let Some(byte) = log.data.get_mut(offset) {
            *byte ^= 0xFF;
        }
    }

    fn check_writable(&self) -> WalResult<()> {
        if self.fail_writes.load(Ordering::Acquire) {
            Err(WalError::storage_unavailable("memory log write failure injected"))
        } else {
            Ok(())
        }
    }
}

impl LogStorage for MemoryLogStorage {
    fn append(&self, data: &[u8]) -> WalResult<()> {
        self.check_writable()?;
        self.log.lock().data.extend_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> WalResult<()> {
        self.check_writable()?;
        let mut log = self.log.lock();
        log.synced = log.data.len();
        Ok(())
    }

    fn read_all(&self) -> WalResult<Bytes> {
        Ok(Bytes::copy_from_slice(&self.log.lock().data))
    }

    fn len(&self) -> WalResult<u64> {
        Ok(self.log.lock().data.len() as u64)
    }

    fn truncate(&self, len: u64) -> WalResult<()> {
        self.check_writable()?;
        let mut log = self.log.lock();
        log.data.truncate(len as usize);
        log.synced = log.data.len();
        Ok(())
    }

    fn replace(&self, contents: &[u8]) -> WalResult<()> {
        self.check_writable()?;
        let mut log = self.log.lock();
        log.data = contents.to_vec();
        log.synced = log.data.len();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_crash_drops_unsynced() {
        let storage = MemoryLogStorage::new();
        storage.append(b"durable").unwrap();
        storage.sync().unwrap();
        storage.append(b"volatile").unwrap();
        assert_eq!(storage.len().unwrap(), 15);

        let handle = storage.clone();
        handle.crash();
        assert_eq!(storage.read_all().unwrap().as_ref(), b"durable");
    }

    #[test]
    fn test_memory_failure_injection() {
        let storage = MemoryLogStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.append(b"x").is_err());
        assert!(storage.sync().is_err());
        storage.set_fail_writes(false);
        storage.append(b"x").unwrap();
        assert!(!storage.is_empty().unwrap());
    }

    #[test]
    fn test_file_storage_append_truncate() {
        let tmp = TempDir::new().unwrap();
        let storage = FileLogStorage::open(tmp.path().join("test.wal")).unwrap();

        storage.append(b"hello ").unwrap();
        storage.append(b"world").unwrap();
        storage.sync().unwrap();
        assert_eq!(storage.read_all().unwrap().as_ref(), b"hello world");

        storage.truncate(5).unwrap();
        storage.append(b"!").unwrap();
        assert_eq!(storage.read_all().unwrap().as_ref(), b"hello!");
    }

    #[test]
    fn test_file_storage_replace_and_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("test.wal");
        {
            let storage = FileLogStorage::open(&path).unwrap();
            storage.append(b"old contents").unwrap();
            storage.replace(b"new").unwrap();
            storage.append(b"er").unwrap();
            storage.sync().unwrap();
        }

        let reopened = FileLogStorage::open(&path).unwrap();
        assert_eq!(reopened.read_all().unwrap().as_ref(), b"newer");
        assert_eq!(reopened.len().unwrap(), 5);
    }
}
