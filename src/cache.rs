//! High-level cache façade over the storage engine.
//!
//! [`DiskCache`] adds what the engine deliberately leaves out: typed object
//! encoding, the inline-vs-file threshold policy, per-cache mutual exclusion,
//! a background auto-trim loop, and fire-and-forget async variants. Handles
//! are cheap clones sharing one engine.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::CacheConfig;
use crate::error::StoreResult;
use crate::store::entry::unix_time;
use crate::store::{StorageMode, Store};

type Job = Box<dyn FnOnce() + Send>;
type Namer = Box<dyn Fn(&str) -> String + Send + Sync>;

/// Granularity of the trim loop's shutdown polling.
const TRIM_POLL_SLICE: Duration = Duration::from_millis(200);

/// A persistent, bounded key/value cache.
///
/// Values are encoded with `serde_json`; raw-bytes variants skip encoding.
/// Every operation takes the per-cache lock, so a `DiskCache` can be shared
/// freely across threads. Operations report failure as `false`/`None` and
/// emit diagnostics through the `log` facade.
///
/// When the configured auto-trim interval is non-zero, a background thread
/// periodically enforces the cost, count, and age limits (in that order).
/// The thread shuts down when the last handle is dropped.
#[derive(Clone)]
pub struct DiskCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    path: PathBuf,
    mode: StorageMode,
    store: Mutex<Store>,
    inline_threshold: usize,
    count_limit: u64,
    cost_limit: u64,
    age_limit_secs: u64,
    namer: Namer,
    shutdown: Arc<AtomicBool>,
    jobs: Mutex<Option<Sender<Job>>>,
}

impl DiskCache {
    /// Opens a cache at `path`, synthesizing blob file names as the hex MD5
    /// of the key.
    pub fn open(path: impl Into<PathBuf>, config: CacheConfig) -> StoreResult<Self> {
        Self::open_with_namer(path, config, |key| format!("{:x}", md5::compute(key)))
    }

    /// Opens a cache with a caller-supplied blob file namer.
    ///
    /// The namer must be deterministic per key: replacing an entry relies on
    /// the new name to identify (or overwrite) the old blob.
    pub fn open_with_namer(
        path: impl Into<PathBuf>,
        config: CacheConfig,
        namer: impl Fn(&str) -> String + Send + Sync + 'static,
    ) -> StoreResult<Self> {
        let path = path.into();
        let store = Store::open_with(&path, &config)?;

        let (tx, rx) = mpsc::channel();
        spawn_worker(rx);

        let inner = Arc::new(CacheInner {
            path,
            mode: config.mode,
            store: Mutex::new(store),
            inline_threshold: config.inline_threshold,
            count_limit: config.count_limit,
            cost_limit: config.cost_limit,
            age_limit_secs: config.age_limit_secs,
            namer: Box::new(namer),
            shutdown: Arc::new(AtomicBool::new(false)),
            jobs: Mutex::new(Some(tx)),
        });

        if config.auto_trim_interval_secs > 0 {
            spawn_trim_loop(&inner, Duration::from_secs(config.auto_trim_interval_secs));
        }
        Ok(Self { inner })
    }

    /// The cache root directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// The storage mode fixed at construction.
    #[must_use]
    pub fn mode(&self) -> StorageMode {
        self.inner.mode
    }

    /// Whether an entry exists for `key`.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.store().contains(key).unwrap_or(false)
    }

    /// Reads and decodes the value for `key`.
    #[must_use]
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get_bytes(key)?;
        decode(key, &bytes)
    }

    /// Reads and decodes the value for `key`, along with its extended data.
    #[must_use]
    pub fn get_with_extended<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Option<(T, Option<Vec<u8>>)> {
        let entry = match self.inner.store().item(key) {
            Ok(entry) => entry?,
            Err(err) => {
                log::error!("cache get failed for {key:?}: {err}");
                return None;
            }
        };
        let value = decode(key, entry.value.as_deref()?)?;
        Some((value, entry.extended_data))
    }

    /// Reads the raw value bytes for `key`.
    #[must_use]
    pub fn get_bytes(&self, key: &str) -> Option<Vec<u8>> {
        match self.inner.store().item_value(key) {
            Ok(value) => value,
            Err(err) => {
                log::error!("cache get failed for {key:?}: {err}");
                None
            }
        }
    }

    /// Encodes and stores `value` under `key`.
    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        self.set_with_extended(key, value, None)
    }

    /// Encodes and stores `value` under `key` with extended data.
    pub fn set_with_extended<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        extended: Option<&[u8]>,
    ) -> bool {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("cache encode failed for {key:?}: {err}");
                return false;
            }
        };
        self.set_bytes(key, &bytes, extended)
    }

    /// Stores raw bytes under `key`.
    ///
    /// Values above the inline threshold go to a blob file (named by the
    /// cache's namer) when the mode allows external storage.
    pub fn set_bytes(&self, key: &str, bytes: &[u8], extended: Option<&[u8]>) -> bool {
        let file_name = match self.inner.mode {
            StorageMode::Sqlite => None,
            StorageMode::File => Some((self.inner.namer)(key)),
            StorageMode::Mixed => {
                (bytes.len() > self.inner.inline_threshold).then(|| (self.inner.namer)(key))
            }
        };
        let result = self
            .inner
            .store()
            .save(key, bytes, file_name.as_deref(), extended);
        match result {
            Ok(()) => true,
            Err(err) => {
                log::error!("cache set failed for {key:?}: {err}");
                false
            }
        }
    }

    /// Removes the entry for `key`.
    pub fn remove(&self, key: &str) -> bool {
        match self.inner.store().remove(key) {
            Ok(()) => true,
            Err(err) => {
                log::error!("cache remove failed for {key:?}: {err}");
                false
            }
        }
    }

    /// Removes every entry.
    pub fn clear(&self) -> bool {
        match self.inner.store().remove_all() {
            Ok(()) => true,
            Err(err) => {
                log::error!("cache clear failed: {err}");
                false
            }
        }
    }

    /// Removes every entry in LRU order, reporting progress per batch and a
    /// final success flag.
    pub fn clear_with_progress<P, C>(&self, progress: P, completion: C)
    where
        P: FnMut(u64, u64),
        C: FnOnce(bool),
    {
        self.inner
            .store()
            .remove_all_with_progress(progress, completion);
    }

    /// Number of cached entries; 0 on storage failure.
    #[must_use]
    pub fn total_count(&self) -> u64 {
        self.inner.store().count().unwrap_or(0)
    }

    /// Total stored value bytes; 0 on storage failure.
    #[must_use]
    pub fn total_cost(&self) -> u64 {
        self.inner.store().total_size().unwrap_or(0)
    }

    /// Evicts LRU entries until at most `count` remain.
    pub fn trim_to_count(&self, count: u64) -> bool {
        self.inner.store().remove_to_fit_count(count).is_ok()
    }

    /// Evicts LRU entries until the total size is at most `cost` bytes.
    pub fn trim_to_cost(&self, cost: u64) -> bool {
        self.inner.store().remove_to_fit_size(cost).is_ok()
    }

    /// Evicts entries whose last access is older than `age`.
    ///
    /// The argument is an age, not a timestamp: the cutoff is `now − age`.
    /// A zero age clears the cache.
    pub fn trim_to_age(&self, age: Duration) -> bool {
        if age.is_zero() {
            return self.clear();
        }
        let cutoff = unix_time().saturating_sub(age.as_secs() as i64);
        self.inner.store().remove_earlier_than(cutoff).is_ok()
    }

    /// Async [`set_with_extended`](DiskCache::set_with_extended); the value
    /// is encoded on the calling thread, storage happens on the shared
    /// worker.
    pub fn set_async<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        extended: Option<Vec<u8>>,
        completion: impl FnOnce(bool) + Send + 'static,
    ) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                log::error!("cache encode failed for {key:?}: {err}");
                completion(false);
                return;
            }
        };
        let cache = self.clone();
        let key = key.to_string();
        self.dispatch(Box::new(move || {
            completion(cache.set_bytes(&key, &bytes, extended.as_deref()));
        }));
    }

    /// Async [`get`](DiskCache::get); decoding and the callback run on the
    /// shared worker.
    pub fn get_async<T>(&self, key: &str, completion: impl FnOnce(Option<T>) + Send + 'static)
    where
        T: DeserializeOwned + 'static,
    {
        let cache = self.clone();
        let key = key.to_string();
        self.dispatch(Box::new(move || {
            completion(cache.get::<T>(&key));
        }));
    }

    /// Async [`remove`](DiskCache::remove).
    pub fn remove_async(&self, key: &str, completion: impl FnOnce(bool) + Send + 'static) {
        let cache = self.clone();
        let key = key.to_string();
        self.dispatch(Box::new(move || {
            completion(cache.remove(&key));
        }));
    }

    /// Async [`clear`](DiskCache::clear).
    pub fn clear_async(&self, completion: impl FnOnce(bool) + Send + 'static) {
        let cache = self.clone();
        self.dispatch(Box::new(move || {
            completion(cache.clear());
        }));
    }

    fn dispatch(&self, job: Job) {
        let sent = match self.inner.jobs.lock() {
            Ok(guard) => guard.as_ref().map(|tx| tx.send(job).is_ok()),
            Err(_) => None,
        };
        if sent != Some(true) {
            log::warn!("cache worker is gone; async operation dropped");
        }
    }
}

impl std::fmt::Debug for DiskCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskCache")
            .field("path", &self.inner.path)
            .field("mode", &self.inner.mode)
            .finish_non_exhaustive()
    }
}

impl CacheInner {
    fn store(&self) -> MutexGuard<'_, Store> {
        // A panicked holder leaves the engine in a consistent state: every
        // operation completes its compensations before returning.
        self.store
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// One auto-trim pass: cost, then count, then age.
    fn trim_pass(&self) {
        let mut store = self.store();
        if self.cost_limit != u64::MAX {
            if let Err(err) = store.remove_to_fit_size(self.cost_limit) {
                log::warn!("auto-trim to cost failed: {err}");
            }
        }
        if self.count_limit != u64::MAX {
            if let Err(err) = store.remove_to_fit_count(self.count_limit) {
                log::warn!("auto-trim to count failed: {err}");
            }
        }
        if self.age_limit_secs != u64::MAX {
            let cutoff = unix_time().saturating_sub(self.age_limit_secs as i64);
            if let Err(err) = store.remove_earlier_than(cutoff) {
                log::warn!("auto-trim to age failed: {err}");
            }
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        // Signal both background threads: the trim loop polls the flag, the
        // worker exits when the channel disconnects.
        self.shutdown.store(true, Ordering::SeqCst);
        if let Ok(mut jobs) = self.jobs.lock() {
            jobs.take();
        }
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Option<T> {
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("cache decode failed for {key:?}: {err}");
            None
        }
    }
}

fn spawn_worker(rx: Receiver<Job>) {
    thread::spawn(move || {
        while let Ok(job) = rx.recv() {
            job();
        }
    });
}

fn spawn_trim_loop(inner: &Arc<CacheInner>, interval: Duration) {
    // The loop holds only a weak handle so an idle cache can be dropped.
    let weak = Arc::downgrade(inner);
    let shutdown = Arc::clone(&inner.shutdown);
    thread::spawn(move || loop {
        let mut waited = Duration::ZERO;
        while waited < interval {
            let slice = TRIM_POLL_SLICE.min(interval - waited);
            thread::sleep(slice);
            waited += slice;
            if shutdown.load(Ordering::SeqCst) {
                return;
            }
        }
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.trim_pass();
    });
}
