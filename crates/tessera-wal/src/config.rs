//! WAL configuration.

use serde::{Deserialize, Serialize};

use tessera_common::constants::MAX_WAL_RECORD_SIZE;

/// Sync policy for WAL writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPolicy {
    /// Sync every commit batch, DDL record and checkpoint before returning.
    #[default]
    EveryCommit,
    /// Never sync (fastest, unsafe - for testing only).
    #[serde(rename = "none", alias = "never")]
    Never,
}

/// Configuration for the Write-Ahead Log.
#[derive(Debug, Clone)]
pub struct WalConfig {
    /// Maximum payload size of a single WAL record.
    pub max_record_size: usize,

    /// Sync policy for durability.
    pub sync_policy: SyncPolicy,

    /// Whether to verify checksums on read.
    pub verify_checksums: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_record_size: MAX_WAL_RECORD_SIZE,
            sync_policy: SyncPolicy::default(),
            verify_checksums: true,
        }
    }
}

impl WalConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum record size.
    #[must_use]
    pub fn with_max_record_size(mut self, size: usize) -> Self {
        self.max_record_size = size;
        self
    }

    /// Sets the sync policy.
    #[must_use]
    pub fn with_sync_policy(mut self, policy: SyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    /// Sets whether to verify checksums on read.
    #[must_use]
    pub fn with_verify_checksums(mut self, verify: bool) -> Self {
        self.verify_checksums = verify;
        self
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_record_size < 1024 {
            return Err("Max record size must be at least 1 KB".to_string());
        }
        if self.max_record_size > u32::MAX as usize {
            return Err("Max record size must fit in a 32-bit length".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WalConfig::default();
        assert_eq!(config.max_record_size, MAX_WAL_RECORD_SIZE);
        assert_eq!(config.sync_policy, SyncPolicy::EveryCommit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let config = WalConfig::new().with_max_record_size(16);
        assert!(config.validate().is_err());

        let config = WalConfig::new()
            .with_sync_policy(SyncPolicy::Never)
            .with_verify_checksums(false);
        assert!(config.validate().is_ok());
        assert!(!config.verify_checksums);
    }
}
