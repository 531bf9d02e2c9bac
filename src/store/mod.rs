//! The hybrid storage engine.
//!
//! # Architecture
//!
//! The engine is layered, leaves first:
//!
//! * [`files`]: blob files under `data/` plus a `trash/` staging area whose
//!   contents a background worker deletes asynchronously.
//! * [`index`]: the SQLite manifest — one row per entry holding metadata and
//!   either the inline bytes or a blob file name. Single source of truth.
//! * [`engine`]: combines the two, dispatching on [`StorageMode`] per write
//!   and enforcing the ordering rules (blob before row; replaced blobs
//!   identified before the row overwrite).
//!
//! # Consistency
//!
//! A blob file always exists before a manifest row references it, so a crash
//! can leave an orphaned file (collected by eviction) but never a dangling
//! reference. If a referenced blob is lost out-of-band, the next read repairs
//! the manifest by deleting the row.

pub mod engine;
pub mod entry;
pub mod files;
mod index;

pub use engine::Store;
pub use entry::{Entry, StorageMode};
pub use files::FileStore;
