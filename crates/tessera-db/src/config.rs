//! Engine configuration.
//!
//! `EngineConfig` is loaded from and saved to TOML. Missing keys take their
//! defaults, so an empty file is a valid configuration:
//!
//! ```toml
//! data_dir = "/var/lib/tessera"
//! default_isolation = "serializable"
//! lock_timeout_ms = 2000
//! sync_policy = "every_commit"
//! checkpoint_interval = 1000
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use tessera_common::{DEFAULT_LOCK_TIMEOUT_MS, WAL_FILE_NAME};
use tessera_mvcc::IsolationLevel;
use tessera_txn::TransactionManagerConfig;
use tessera_wal::{SyncPolicy, WalConfig};

use crate::database::{DatabaseError, DatabaseResult};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory holding the log. `None` keeps the log in memory.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// Isolation level used by `Database::begin`.
    #[serde(default)]
    pub default_isolation: IsolationLevel,

    /// How long a statement waits for a row lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// When the log is synced.
    #[serde(default)]
    pub sync_policy: SyncPolicy,

    /// Commits between automatic checkpoints. 0 disables them.
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_checkpoint_interval() -> u64 {
    1000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_isolation: IsolationLevel::default(),
            lock_timeout_ms: default_lock_timeout_ms(),
            sync_policy: SyncPolicy::default(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

impl EngineConfig {
    /// Creates a default (in-memory) configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a configuration that keeps its log under `dir`.
    pub fn with_path(dir: impl Into<PathBuf>) -> Self {
        Self::default().with_data_dir(dir)
    }

    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> DatabaseResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DatabaseError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save(&self, path: &Path) -> DatabaseResult<()> {
        let content = self.to_toml()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Converts configuration to a TOML string.
    pub fn to_toml(&self) -> DatabaseResult<String> {
        toml::to_string_pretty(self).map_err(|e| DatabaseError::Config(e.to_string()))
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the default isolation level.
    #[must_use]
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Sets the lock timeout in milliseconds.
    #[must_use]
    pub fn with_lock_timeout_ms(mut self, ms: u64) -> Self {
        self.lock_timeout_ms = ms;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets the automatic checkpoint interval.
    #[must_use]
    pub fn with_checkpoint_interval(mut self, commits: u64) -> Self {
        self.checkpoint_interval = commits;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> DatabaseResult<()> {
        if self.lock_timeout_ms == 0 {
            return Err(DatabaseError::Config(
                "lock_timeout_ms must be positive".to_string(),
            ));
        }
        if let Some(dir) = &self.data_dir {
            if dir.as_os_str().is_empty() {
                return Err(DatabaseError::Config("data_dir is empty".to_string()));
            }
        }
        self.wal_config().validate().map_err(DatabaseError::Config)?;
        self.transaction_config()
            .validate()
            .map_err(DatabaseError::Config)
    }

    /// Returns the log file path, if the log lives on disk.
    pub fn wal_path(&self) -> Option<PathBuf> {
        self.data_dir.as_ref().map(|dir| dir.join(WAL_FILE_NAME))
    }

    /// Builds the WAL configuration.
    pub fn wal_config(&self) -> WalConfig {
        WalConfig::new().with_sync_policy(self.sync_policy)
    }

    /// Builds the transaction manager configuration.
    pub fn transaction_config(&self) -> TransactionManagerConfig {
        TransactionManagerConfig::new()
            .with_default_isolation(self.default_isolation)
            .with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.data_dir.is_none());
        assert_eq!(config.default_isolation, IsolationLevel::RepeatableRead);
        assert_eq!(config.lock_timeout_ms, DEFAULT_LOCK_TIMEOUT_MS);
        assert!(config.validate().is_ok());
        assert!(config.wal_path().is_none());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            default_isolation = "serializable"
            sync_policy = "none"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_isolation, IsolationLevel::Serializable);
        assert_eq!(config.sync_policy, SyncPolicy::Never);
        assert_eq!(config.checkpoint_interval, 1000);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("tessera.toml");

        let config = EngineConfig::with_path(dir.path())
            .with_default_isolation(IsolationLevel::ReadCommitted)
            .with_lock_timeout_ms(250)
            .with_checkpoint_interval(0);
        config.save(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.wal_path(), Some(dir.path().join(WAL_FILE_NAME)));
    }

    #[test]
    fn test_validation() {
        let err = EngineConfig::new().with_lock_timeout_ms(0).validate();
        assert!(matches!(err, Err(DatabaseError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "lock_timeout_ms = \"soon\"").unwrap();
        assert!(matches!(
            EngineConfig::from_file(&path),
            Err(DatabaseError::Config(_))
        ));
    }

    #[test]
    fn test_lower_level_configs() {
        let config = EngineConfig::new()
            .with_lock_timeout_ms(1500)
            .with_sync_policy(SyncPolicy::Never);
        assert_eq!(config.wal_config().sync_policy, SyncPolicy::Never);
        assert_eq!(
            config.transaction_config().lock_timeout,
            Duration::from_millis(1500)
        );
    }
}
