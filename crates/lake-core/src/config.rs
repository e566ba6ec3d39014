use std::path::Path;
use std::time::Duration;

use lake_commits::CacheConfig;
use lake_journal::JournalConfig;
use serde::{Deserialize, Serialize};

use crate::error::{LakeError, Result};

/// Tunables of a lake handle.
///
/// Every field has a default, so a TOML file only needs the keys it
/// changes:
///
/// ```toml
/// max_commit_retries = 20
/// snapshot_cache = 16
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LakeConfig {
    /// Branch commit attempts before giving up with `CommitFailed`.
    pub max_commit_retries: u32,
    /// Pause between branch commit attempts, in milliseconds.
    pub commit_retry_delay_ms: u64,
    /// How long a loaded journal table is trusted, in milliseconds.
    pub journal_ttl_ms: u64,
    pub journal_max_retries: usize,
    pub journal_retry_delay_ms: u64,
    /// Cache capacities, in entries.
    pub object_cache: usize,
    pub path_cache: usize,
    pub snapshot_cache: usize,
    /// Bound of the channel between the vacuum walker and its consumer.
    pub vacuum_channel_capacity: usize,
}

impl Default for LakeConfig {
    fn default() -> Self {
        Self {
            max_commit_retries: 10,
            commit_retry_delay_ms: 10,
            journal_ttl_ms: 1000,
            journal_max_retries: 10,
            journal_retry_delay_ms: 10,
            object_cache: 1024,
            path_cache: 256,
            snapshot_cache: 64,
            vacuum_channel_capacity: 256,
        }
    }
}

impl LakeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| LakeError::Config(e.to_string()))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| LakeError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn commit_retry_delay(&self) -> Duration {
        Duration::from_millis(self.commit_retry_delay_ms)
    }

    pub fn journal_config(&self) -> JournalConfig {
        JournalConfig {
            ttl: Duration::from_millis(self.journal_ttl_ms),
            max_retries: self.journal_max_retries,
            retry_delay: Duration::from_millis(self.journal_retry_delay_ms),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            objects: self.object_cache,
            paths: self.path_cache,
            snapshots: self.snapshot_cache,
        }
    }
}
