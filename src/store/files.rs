//! Blob file storage under the cache root.
//!
//! The file store owns two directories: `data/` holds blob files named by
//! opaque UTF-8 names chosen by the caller, and `trash/` holds subtrees
//! staged for asynchronous deletion. Trash contents are never read back.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use memmap2::Mmap;
use uuid::Uuid;

use crate::error::StoreResult;

const DATA_DIR: &str = "data";
const TRASH_DIR: &str = "trash";

/// Blob file storage with a staging area for deferred deletion.
///
/// A single serial worker thread empties `trash/`; requests to sweep never
/// block the caller. Dropping the store disconnects the worker, which exits
/// after finishing any queued sweep.
#[derive(Debug)]
pub struct FileStore {
    data_dir: PathBuf,
    trash_dir: PathBuf,
    mmap_threshold: usize,
    sweeper: TrashSweeper,
}

impl FileStore {
    /// Creates `data/` and `trash/` under `root` and starts the trash worker.
    pub fn open(root: &Path) -> StoreResult<Self> {
        let data_dir = root.join(DATA_DIR);
        let trash_dir = root.join(TRASH_DIR);
        fs::create_dir_all(&data_dir)?;
        fs::create_dir_all(&trash_dir)?;

        Ok(Self {
            data_dir,
            trash_dir: trash_dir.clone(),
            mmap_threshold: 0,
            sweeper: TrashSweeper::start(trash_dir),
        })
    }

    /// Sets the minimum file length for memory-mapped reads.
    ///
    /// Zero (the default) disables mapping and all reads go through
    /// `fs::read`.
    #[must_use]
    pub fn with_mmap_threshold(mut self, threshold: usize) -> Self {
        self.mmap_threshold = threshold;
        self
    }

    /// Absolute path of the blob file for `name`.
    #[must_use]
    pub fn blob_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Writes `bytes` to `data/<name>`, creating or truncating the file.
    pub fn write(&self, name: &str, bytes: &[u8]) -> StoreResult<()> {
        fs::write(self.blob_path(name), bytes)?;
        Ok(())
    }

    /// Reads the blob file `name` in full.
    ///
    /// Files at or above the configured mmap threshold are memory-mapped and
    /// copied out; smaller files use a plain read.
    pub fn read(&self, name: &str) -> StoreResult<Vec<u8>> {
        let path = self.blob_path(name);
        if self.mmap_threshold > 0 {
            let file = fs::File::open(&path)?;
            let len = file.metadata()?.len();
            if len as usize >= self.mmap_threshold {
                // Safety: the mapping is copied out before the file handle is
                // dropped, and the cache assumes single-process ownership of
                // data/, so the file is not truncated while mapped.
                let map = unsafe { Mmap::map(&file)? };
                return Ok(map.to_vec());
            }
        }
        Ok(fs::read(path)?)
    }

    /// Removes the blob file `name`.
    ///
    /// A missing file is an error at this layer; callers that delete
    /// best-effort ignore the result.
    pub fn delete(&self, name: &str) -> StoreResult<()> {
        fs::remove_file(self.blob_path(name))?;
        Ok(())
    }

    /// Renames `data/` into a fresh UUID-named subdirectory of `trash/` and
    /// recreates an empty `data/`.
    pub fn move_all_to_trash(&self) -> StoreResult<()> {
        let staged = self.trash_dir.join(Uuid::new_v4().to_string());
        fs::rename(&self.data_dir, &staged)?;
        fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }

    /// Schedules deletion of everything under `trash/` on the worker thread.
    ///
    /// Never blocks. Repeated calls coalesce: each sweep deletes whatever it
    /// sees at the time it runs.
    pub fn empty_trash(&self) {
        self.sweeper.request_sweep();
    }
}

/// Serial background worker that empties the trash directory.
#[derive(Debug)]
struct TrashSweeper {
    tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TrashSweeper {
    fn start(trash_dir: PathBuf) -> Self {
        let (tx, rx) = mpsc::channel();
        let handle = thread::spawn(move || Self::run(&trash_dir, &rx));
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }

    fn request_sweep(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(());
        }
    }

    fn run(trash_dir: &Path, rx: &Receiver<()>) {
        while rx.recv().is_ok() {
            // Coalesce any requests that piled up while sweeping.
            while rx.try_recv().is_ok() {}
            Self::sweep(trash_dir);
        }
    }

    /// Deletes every entry under the trash directory, best-effort.
    fn sweep(trash_dir: &Path) {
        let entries = match fs::read_dir(trash_dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("trash sweep could not list {}: {err}", trash_dir.display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(err) = removed {
                // Entries can vanish under concurrent sweeps.
                if err.kind() != io::ErrorKind::NotFound {
                    log::warn!("trash sweep failed for {}: {err}", path.display());
                }
            }
        }
    }
}

impl Drop for TrashSweeper {
    fn drop(&mut self) {
        // Disconnecting the channel is the worker's shutdown signal.
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
