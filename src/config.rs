//! Cache configuration.

use serde::{Deserialize, Serialize};

use crate::store::StorageMode;

/// Default inline threshold: values above this many serialized bytes go to a
/// blob file when the mode allows it.
pub const DEFAULT_INLINE_THRESHOLD: usize = 20 * 1024;

/// Default auto-trim interval in seconds.
pub const DEFAULT_TRIM_INTERVAL_SECS: u64 = 60;

/// Configuration for a cache instance.
///
/// All limits default to "no limit". Construct with `Default` and adjust via
/// the `with_*` methods:
///
/// ```
/// use blobstash::{CacheConfig, StorageMode};
///
/// let config = CacheConfig::default()
///     .with_mode(StorageMode::Mixed)
///     .with_count_limit(10_000)
///     .with_cost_limit(256 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Storage mode fixed for the cache's lifetime.
    #[serde(default)]
    pub mode: StorageMode,

    /// Serialized values larger than this are stored as blob files when the
    /// mode is not Sqlite.
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,

    /// Maximum number of entries kept by the auto-trim loop.
    #[serde(default = "default_no_limit")]
    pub count_limit: u64,

    /// Maximum total value bytes kept by the auto-trim loop.
    #[serde(default = "default_no_limit")]
    pub cost_limit: u64,

    /// Maximum entry age in seconds, measured from last access.
    #[serde(default = "default_no_limit")]
    pub age_limit_secs: u64,

    /// Seconds between auto-trim passes; 0 disables the background loop.
    #[serde(default = "default_trim_interval")]
    pub auto_trim_interval_secs: u64,

    /// Minimum blob file length for memory-mapped reads; 0 disables mapping.
    #[serde(default)]
    pub mmap_threshold: usize,

    /// Emit diagnostics through the `log` facade on storage errors.
    #[serde(default = "default_true")]
    pub error_logs: bool,
}

fn default_inline_threshold() -> usize {
    DEFAULT_INLINE_THRESHOLD
}

fn default_no_limit() -> u64 {
    u64::MAX
}

fn default_trim_interval() -> u64 {
    DEFAULT_TRIM_INTERVAL_SECS
}

fn default_true() -> bool {
    true
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode: StorageMode::default(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            count_limit: u64::MAX,
            cost_limit: u64::MAX,
            age_limit_secs: u64::MAX,
            auto_trim_interval_secs: DEFAULT_TRIM_INTERVAL_SECS,
            mmap_threshold: 0,
            error_logs: true,
        }
    }
}

impl CacheConfig {
    /// Set the storage mode.
    #[must_use]
    pub fn with_mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the inline-vs-file threshold in bytes.
    #[must_use]
    pub fn with_inline_threshold(mut self, bytes: usize) -> Self {
        self.inline_threshold = bytes;
        self
    }

    /// Limit the number of entries.
    #[must_use]
    pub fn with_count_limit(mut self, limit: u64) -> Self {
        self.count_limit = limit;
        self
    }

    /// Limit the total stored bytes.
    #[must_use]
    pub fn with_cost_limit(mut self, limit: u64) -> Self {
        self.cost_limit = limit;
        self
    }

    /// Limit entry age (seconds since last access).
    #[must_use]
    pub fn with_age_limit_secs(mut self, secs: u64) -> Self {
        self.age_limit_secs = secs;
        self
    }

    /// Set the auto-trim interval; 0 disables the background loop.
    #[must_use]
    pub fn with_auto_trim_interval_secs(mut self, secs: u64) -> Self {
        self.auto_trim_interval_secs = secs;
        self
    }

    /// Set the minimum blob length for memory-mapped reads.
    #[must_use]
    pub fn with_mmap_threshold(mut self, bytes: usize) -> Self {
        self.mmap_threshold = bytes;
        self
    }

    /// Enable or disable error diagnostics.
    #[must_use]
    pub fn with_error_logs(mut self, enabled: bool) -> Self {
        self.error_logs = enabled;
        self
    }
}
