//! The hybrid storage engine combining the manifest and the file store.
//!
//! Entry bytes live either inline in the manifest or in a blob file under
//! `data/`, chosen per write according to the storage mode. The manifest is
//! the single source of truth: a blob file is written before the row that
//! references it, and a row overwrite identifies the replaced row's blob for
//! deletion before it is lost.
//!
//! The engine is not internally synchronized; it presumes single-threaded
//! access per instance. [`crate::cache::DiskCache`] provides the per-cache
//! mutual exclusion.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::CacheConfig;
use crate::error::{StoreError, StoreResult};
use crate::store::entry::{unix_time, Entry, StorageMode};
use crate::store::files::FileStore;
use crate::store::index::Manifest;

/// Manifest database file name; `-shm` / `-wal` companions sit beside it.
const MANIFEST_FILE: &str = "manifest.sqlite";

/// Rows fetched per round of the LRU eviction loop.
const EVICTION_BATCH: u32 = 16;

/// Rows fetched per round of the streaming wipe.
const WIPE_BATCH: u32 = 32;

/// Longest accepted cache root, leaving room for nested blob names.
const MAX_ROOT_PATH_LEN: usize = 4096 - 64;

/// Persistent key/value store with hybrid inline/file storage.
///
/// Construction bootstraps the on-disk layout (`manifest.sqlite`, `data/`,
/// `trash/`) under the root path. If the manifest cannot be opened, the
/// engine resets on-disk state (stages `data/` for trash, deletes the
/// manifest triad) and retries once before failing construction.
#[derive(Debug)]
pub struct Store {
    root: PathBuf,
    mode: StorageMode,
    manifest: Manifest,
    files: FileStore,
    error_logs: bool,
}

impl Store {
    /// Opens a store at `root` in the given mode with default options.
    pub fn open(root: impl Into<PathBuf>, mode: StorageMode) -> StoreResult<Self> {
        let config = CacheConfig {
            mode,
            ..CacheConfig::default()
        };
        Self::open_with(root, &config)
    }

    /// Opens a store at `root` configured by `config`.
    pub fn open_with(root: impl Into<PathBuf>, config: &CacheConfig) -> StoreResult<Self> {
        let root = root.into();
        if root.as_os_str().len() > MAX_ROOT_PATH_LEN {
            return Err(StoreError::PathTooLong(root));
        }
        fs::create_dir_all(&root)?;

        let files = FileStore::open(&root)?.with_mmap_threshold(config.mmap_threshold);
        let manifest = Manifest::new(root.join(MANIFEST_FILE), config.error_logs);
        let mut store = Self {
            root,
            mode: config.mode,
            manifest,
            files,
            error_logs: config.error_logs,
        };

        if store.manifest.open().is_err() {
            // The manifest is unusable; clear on-disk state and start fresh.
            store
                .reset()
                .map_err(|err| StoreError::Reset(err.to_string()))?;
        }
        Ok(store)
    }

    /// The cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The storage mode fixed at construction.
    #[must_use]
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Stages `data/` for asynchronous deletion, deletes the manifest triad,
    /// and reopens an empty manifest.
    fn reset(&mut self) -> StoreResult<()> {
        self.manifest.close();
        self.manifest.delete_files()?;
        self.files.move_all_to_trash()?;
        self.files.empty_trash();
        self.manifest.open()
    }

    /// Saves an entry, replacing any previous entry with the same key.
    ///
    /// `key` and `value` must be non-empty. File mode requires a non-empty
    /// `file_name`; Sqlite mode ignores any provided name and stores the
    /// value inline. When storing externally, the blob file is written before
    /// the manifest row; a manifest failure deletes the just-written blob.
    /// A replaced row's blob is deleted once the new row is committed.
    pub fn save(
        &mut self,
        key: &str,
        value: &[u8],
        file_name: Option<&str>,
        extended: Option<&[u8]>,
    ) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        if value.is_empty() {
            return Err(StoreError::BadArgument("value must not be empty"));
        }
        let file_name = match self.mode {
            StorageMode::Sqlite => None,
            StorageMode::Mixed => file_name.filter(|n| !n.is_empty()),
            StorageMode::File => match file_name.filter(|n| !n.is_empty()) {
                Some(name) => Some(name),
                None => {
                    return Err(StoreError::BadArgument(
                        "file mode requires a file name on save",
                    ))
                }
            },
        };

        match file_name {
            Some(name) => {
                // Blob first: a row must never reference a missing file.
                self.files.write(name, value)?;
                let previous = match self.manifest.get_file_name(key) {
                    Ok(previous) => previous,
                    Err(err) => {
                        let _ = self.files.delete(name);
                        return Err(err);
                    }
                };
                if let Err(err) = self.manifest.save(key, value, Some(name), extended) {
                    let _ = self.files.delete(name);
                    return Err(err);
                }
                if let Some(old) = previous {
                    if old != name {
                        let _ = self.files.delete(&old);
                    }
                }
                Ok(())
            }
            None => {
                let previous = if self.mode == StorageMode::Sqlite {
                    None
                } else {
                    self.manifest.get_file_name(key)?
                };
                self.manifest.save(key, value, None, extended)?;
                if let Some(old) = previous {
                    let _ = self.files.delete(&old);
                }
                Ok(())
            }
        }
    }

    /// Removes the entry for `key`, deleting its blob file if one exists.
    pub fn remove(&mut self, key: &str) -> StoreResult<()> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        if self.mode != StorageMode::Sqlite {
            if let Some(name) = self.manifest.get_file_name(key)? {
                let _ = self.files.delete(&name);
            }
        }
        self.manifest.delete(key)
    }

    /// Removes many entries and their blob files.
    pub fn remove_many(&mut self, keys: &[&str]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if self.mode != StorageMode::Sqlite {
            for name in self.manifest.get_file_names(keys)? {
                let _ = self.files.delete(&name);
            }
        }
        self.manifest.delete_many(keys)
    }

    /// Evicts every entry whose size exceeds `size` bytes.
    ///
    /// `u64::MAX` matches nothing and succeeds without work; `0` delegates to
    /// [`remove_all`](Store::remove_all).
    pub fn remove_larger_than(&mut self, size: u64) -> StoreResult<()> {
        if size == u64::MAX {
            return Ok(());
        }
        if size == 0 {
            return self.remove_all();
        }
        if self.mode != StorageMode::Sqlite {
            for name in self.manifest.get_file_names_larger_than(size)? {
                let _ = self.files.delete(&name);
            }
        }
        self.manifest.delete_larger_than(size)?;
        self.manifest.checkpoint()
    }

    /// Evicts every entry last accessed before the absolute timestamp `time`
    /// (seconds since epoch).
    ///
    /// Non-positive cutoffs match nothing and succeed without work;
    /// `i64::MAX` delegates to [`remove_all`](Store::remove_all).
    pub fn remove_earlier_than(&mut self, time: i64) -> StoreResult<()> {
        if time <= 0 {
            return Ok(());
        }
        if time == i64::MAX {
            return self.remove_all();
        }
        if self.mode != StorageMode::Sqlite {
            for name in self.manifest.get_file_names_earlier_than(time)? {
                let _ = self.files.delete(&name);
            }
        }
        self.manifest.delete_earlier_than(time)?;
        self.manifest.checkpoint()
    }

    /// Evicts least-recently-used entries until the total size is at most
    /// `target` bytes. Sentinels as in
    /// [`remove_larger_than`](Store::remove_larger_than).
    pub fn remove_to_fit_size(&mut self, target: u64) -> StoreResult<()> {
        if target == u64::MAX {
            return Ok(());
        }
        if target == 0 {
            return self.remove_all();
        }
        let mut total = self.manifest.total_size()?;
        'evict: while total > target {
            let batch = self.manifest.get_size_infos(EVICTION_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for info in batch {
                if total <= target {
                    break 'evict;
                }
                if let Some(name) = &info.file_name {
                    let _ = self.files.delete(name);
                }
                self.manifest.delete(&info.key)?;
                total = total.saturating_sub(info.size);
            }
        }
        self.manifest.checkpoint()
    }

    /// Evicts least-recently-used entries until at most `target` entries
    /// remain. Sentinels as in
    /// [`remove_larger_than`](Store::remove_larger_than).
    pub fn remove_to_fit_count(&mut self, target: u64) -> StoreResult<()> {
        if target == u64::MAX {
            return Ok(());
        }
        if target == 0 {
            return self.remove_all();
        }
        let mut total = self.manifest.total_count()?;
        'evict: while total > target {
            let batch = self.manifest.get_size_infos(EVICTION_BATCH)?;
            if batch.is_empty() {
                break;
            }
            for info in batch {
                if total <= target {
                    break 'evict;
                }
                if let Some(name) = &info.file_name {
                    let _ = self.files.delete(name);
                }
                self.manifest.delete(&info.key)?;
                total -= 1;
            }
        }
        self.manifest.checkpoint()
    }

    /// Wipes the cache: closes the manifest, stages `data/` for asynchronous
    /// deletion, deletes the manifest triad, and re-initializes.
    pub fn remove_all(&mut self) -> StoreResult<()> {
        self.reset()
    }

    /// Streaming wipe in least-recently-used order.
    ///
    /// Entries are removed in batches; `progress(removed, total)` runs after
    /// each batch and `completion(success)` once at the end.
    pub fn remove_all_with_progress<P, C>(&mut self, mut progress: P, completion: C)
    where
        P: FnMut(u64, u64),
        C: FnOnce(bool),
    {
        let total = match self.manifest.total_count() {
            Ok(total) => total,
            Err(err) => {
                self.log_error("remove_all_with_progress", &err);
                completion(false);
                return;
            }
        };
        if total == 0 {
            completion(true);
            return;
        }

        let mut removed = 0u64;
        let success = 'wipe: loop {
            let batch = match self.manifest.get_size_infos(WIPE_BATCH) {
                Ok(batch) => batch,
                Err(err) => {
                    self.log_error("remove_all_with_progress", &err);
                    break false;
                }
            };
            if batch.is_empty() {
                break true;
            }
            for info in batch {
                if let Some(name) = &info.file_name {
                    let _ = self.files.delete(name);
                }
                if let Err(err) = self.manifest.delete(&info.key) {
                    self.log_error("remove_all_with_progress", &err);
                    break 'wipe false;
                }
                removed += 1;
            }
            progress(removed, total);
        };
        if success {
            let _ = self.manifest.checkpoint();
        }
        completion(success);
    }

    /// Reads the full entry for `key`, including its value bytes, and
    /// refreshes the access time.
    ///
    /// If the row references a blob file that cannot be read, the row is
    /// deleted and the entry reported absent.
    pub fn item(&mut self, key: &str) -> StoreResult<Option<Entry>> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        let Some(mut entry) = self.manifest.get_item(key, false)? else {
            return Ok(None);
        };
        if let Some(name) = entry.file_name.clone() {
            match self.files.read(&name) {
                Ok(bytes) => entry.value = Some(bytes),
                Err(err) => {
                    self.log_error("item blob read", &err);
                    let _ = self.manifest.delete(key);
                    return Ok(None);
                }
            }
        }
        let now = unix_time();
        let _ = self.manifest.update_access_time(key, now);
        entry.accessed_at = now;
        Ok(Some(entry))
    }

    /// Reads entry metadata without the value bytes. Does not touch the
    /// access time.
    pub fn item_info(&mut self, key: &str) -> StoreResult<Option<Entry>> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        self.manifest.get_item(key, true)
    }

    /// Reads only the value bytes for `key`, refreshing the access time on
    /// success. Lost blobs are repaired as in [`item`](Store::item).
    pub fn item_value(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        let value = match self.mode {
            StorageMode::Sqlite => self.manifest.get_value(key)?,
            StorageMode::File | StorageMode::Mixed => {
                match self.manifest.get_file_name(key)? {
                    Some(name) => match self.files.read(&name) {
                        Ok(bytes) => Some(bytes),
                        Err(err) => {
                            self.log_error("item_value blob read", &err);
                            let _ = self.manifest.delete(key);
                            None
                        }
                    },
                    None if self.mode == StorageMode::Mixed => self.manifest.get_value(key)?,
                    None => None,
                }
            }
        };
        if value.is_some() {
            let _ = self.manifest.update_access_time(key, unix_time());
        }
        Ok(value)
    }

    /// Bulk read of full entries.
    ///
    /// File-backed entries whose blob cannot be read are dropped from the
    /// result and their rows deleted. A non-empty result refreshes the access
    /// time for the queried keys.
    pub fn items(&mut self, keys: &[&str]) -> StoreResult<Vec<Entry>> {
        let mut entries = self.manifest.get_items(keys, false)?;
        if self.mode != StorageMode::Sqlite {
            let mut lost: Vec<String> = Vec::new();
            for entry in &mut entries {
                if let Some(name) = &entry.file_name {
                    match self.files.read(name) {
                        Ok(bytes) => entry.value = Some(bytes),
                        Err(err) => {
                            self.log_error("items blob read", &err);
                            lost.push(entry.key.clone());
                        }
                    }
                }
            }
            if !lost.is_empty() {
                let refs: Vec<&str> = lost.iter().map(String::as_str).collect();
                let _ = self.manifest.delete_many(&refs);
                entries.retain(|entry| !lost.contains(&entry.key));
            }
        }
        if !entries.is_empty() {
            let _ = self.manifest.update_access_times(keys, unix_time());
        }
        Ok(entries)
    }

    /// Bulk metadata read; access times are untouched.
    pub fn item_infos(&mut self, keys: &[&str]) -> StoreResult<Vec<Entry>> {
        self.manifest.get_items(keys, true)
    }

    /// Bulk value read as a key-to-bytes map.
    pub fn item_values(&mut self, keys: &[&str]) -> StoreResult<HashMap<String, Vec<u8>>> {
        let entries = self.items(keys)?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| entry.value.map(|value| (entry.key, value)))
            .collect())
    }

    /// Whether an entry exists for `key`.
    pub fn contains(&mut self, key: &str) -> StoreResult<bool> {
        if key.is_empty() {
            return Err(StoreError::BadArgument("key must not be empty"));
        }
        Ok(self.manifest.item_count(key)? > 0)
    }

    /// Number of cached entries.
    pub fn count(&mut self) -> StoreResult<u64> {
        self.manifest.total_count()
    }

    /// Total stored value bytes across all entries.
    pub fn total_size(&mut self) -> StoreResult<u64> {
        self.manifest.total_size()
    }

    fn log_error(&self, op: &str, err: &StoreError) {
        if self.error_logs {
            log::error!("{op} failed: {err}");
        }
    }
}
