//! blobstash - persistent key/value cache for binary payloads.
//!
//! A bounded on-disk cache that stores small values inline in a SQLite
//! manifest and large values as external blob files, with the manifest as the
//! single source of truth. Eviction runs under count, size, and age pressure
//! in least-recently-used order.
//!
//! Two layers are exposed:
//!
//! * [`Store`] — the storage engine: explicit results, single-threaded per
//!   instance, full control over inline-vs-file placement.
//! * [`DiskCache`] — a thread-safe façade adding typed values, the inline
//!   threshold policy, background auto-trim, and async variants.
//!
//! ```no_run
//! use blobstash::{CacheConfig, DiskCache};
//!
//! let cache = DiskCache::open("/tmp/my-cache", CacheConfig::default())?;
//! cache.set("greeting", &"hello".to_string());
//! let value: Option<String> = cache.get("greeting");
//! # Ok::<(), blobstash::StoreError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use cache::DiskCache;
pub use config::CacheConfig;
pub use error::{StoreError, StoreResult};
pub use store::{Entry, StorageMode, Store};
