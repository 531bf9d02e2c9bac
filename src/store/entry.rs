//! Cache entry data model.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Where entry bytes live, fixed at cache construction time.
///
/// The engine dispatches on this tag per operation; there is no separate
/// implementation per mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Every entry's bytes live in a blob file under `data/`; the manifest
    /// only carries metadata. Saving requires a file name.
    File,
    /// Every entry's bytes live inline in the manifest; no blob files are
    /// ever created.
    Sqlite,
    /// Per-write choice: inline when the caller passes no file name,
    /// external when it does.
    Mixed,
}

impl Default for StorageMode {
    fn default() -> Self {
        Self::Mixed
    }
}

/// A single cached record.
///
/// `value` is `None` on metadata-only reads (`item_info`) and always `Some`
/// on value-returning reads. `file_name` is `None` for inline entries.
/// Timestamps are seconds since the Unix epoch; `accessed_at` is refreshed
/// on every successful value-returning read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Non-empty key identifying the entry.
    pub key: String,
    /// The cached bytes, when projected by the read.
    pub value: Option<Vec<u8>>,
    /// Blob file name under `data/`, when stored externally.
    pub file_name: Option<String>,
    /// Byte length of the stored value.
    pub size: u64,
    /// Seconds since epoch at the time of the last save.
    pub modified_at: i64,
    /// Seconds since epoch of the last save or value-returning read.
    pub accessed_at: i64,
    /// Optional opaque side-channel bytes stored with the entry.
    pub extended_data: Option<Vec<u8>>,
}

impl Entry {
    /// Whether the entry's bytes live inline in the manifest.
    #[must_use]
    pub fn is_inline(&self) -> bool {
        self.file_name.is_none()
    }
}

/// Current wall-clock time as whole seconds since the Unix epoch.
///
/// Clocks before the epoch collapse to 0; the manifest schema stores
/// timestamps as signed integers.
#[must_use]
pub(crate) fn unix_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(file_name: Option<&str>) -> Entry {
        Entry {
            key: "k".to_string(),
            value: Some(vec![1, 2, 3]),
            file_name: file_name.map(str::to_string),
            size: 3,
            modified_at: 100,
            accessed_at: 100,
            extended_data: None,
        }
    }

    #[test]
    fn test_is_inline() {
        assert!(sample(None).is_inline());
        assert!(!sample(Some("blob-1")).is_inline());
    }

    #[test]
    fn test_default_mode_is_mixed() {
        assert_eq!(StorageMode::default(), StorageMode::Mixed);
    }

    #[test]
    fn test_unix_time_is_positive() {
        assert!(unix_time() > 0);
    }
}
