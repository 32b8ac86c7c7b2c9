//! Configuration for the artifact cache.
//!
//! Defaults are grouped as associated constants; [`CacheConfig`] is the
//! serde-loadable runtime form.

use crate::error::{CacheError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default values for cache construction.
pub struct CacheDefaults;

impl CacheDefaults {
    pub const STORE_FILE_NAME: &'static str = "runtime_cache.db";
    pub const MEMORY_CAPACITY: usize = 512;
    pub const MAX_ROWS: usize = 5_000;
    pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
    pub const RETRY_ATTEMPTS: u32 = 3;
    pub const RETRY_DELAY: Duration = Duration::from_millis(50);
}

/// Runtime configuration for an [`ArtifactCache`](crate::ArtifactCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "snake_case")]
pub struct CacheConfig {
    /// Maximum entries held by the in-process tier (0 behaves as 1).
    pub memory_capacity: usize,
    /// Rows kept per namespace table after pruning.
    pub max_rows: usize,
    /// SQLite busy timeout in milliseconds.
    pub busy_timeout_ms: u64,
    /// Retry policy for transient lock contention.
    pub retry: RetryPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: CacheDefaults::MEMORY_CAPACITY,
            max_rows: CacheDefaults::MAX_ROWS,
            busy_timeout_ms: CacheDefaults::BUSY_TIMEOUT.as_millis() as u64,
            retry: RetryPolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory_capacity = capacity;
        self
    }

    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }

    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw =
            std::fs::read_to_string(path).map_err(|e| CacheError::io_with_path(e, path))?;
        let config: CacheConfig = serde_json::from_str(&raw).map_err(|e| CacheError::Config {
            message: format!("Invalid cache config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the store unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_rows == 0 {
            return Err(CacheError::Config {
                message: "max_rows must be greater than zero".to_string(),
            });
        }
        if self.retry.max_attempts == 0 {
            return Err(CacheError::Config {
                message: "retry.max_attempts must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Resolve the conventional store file inside an application data directory.
pub fn runtime_cache_path(data_dir: impl AsRef<Path>) -> PathBuf {
    data_dir.as_ref().join(CacheDefaults::STORE_FILE_NAME)
}
