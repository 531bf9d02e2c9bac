//! SQLite-backed manifest: the cache index.
//!
//! The manifest is the single source of truth for cached entries. One row per
//! entry holds the key, size, timestamps, optional extended data, and either
//! the inline bytes or the name of a blob file in the file store.
//!
//! # Resilience
//!
//! The connection is opened lazily and re-opened with a capped backoff: after
//! a failed open, another attempt is made only once at least
//! [`OPEN_RETRY_DELAY`] has elapsed, and after [`MAX_OPEN_ATTEMPTS`] failures
//! the manifest stays unavailable until the process restarts. Statement
//! preparation is cached per SQL text and bounded; statements whose text
//! depends on the argument count (IN lists) are prepared per call and
//! finalized on drop.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::error::{StoreError, StoreResult};
use crate::store::entry::{unix_time, Entry};

/// Open failures tolerated before the manifest is considered lost.
const MAX_OPEN_ATTEMPTS: u32 = 8;

/// Minimum spacing between open attempts after a failure.
const OPEN_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Bound on rusqlite's prepared-statement cache.
const STATEMENT_CACHE_CAPACITY: usize = 20;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS manifest (
  key text,
  filename text,
  size integer,
  inline_data blob,
  modification_time integer,
  last_access_time integer,
  extended_data blob,
  PRIMARY KEY(key)
);
CREATE INDEX IF NOT EXISTS last_access_time_idx ON manifest(last_access_time);
";

/// Projection used by the LRU eviction cursor.
#[derive(Debug, Clone)]
pub(crate) struct SizeInfo {
    pub key: String,
    pub file_name: Option<String>,
    pub size: u64,
}

/// The on-disk index over one SQLite database.
#[derive(Debug)]
pub(crate) struct Manifest {
    path: PathBuf,
    conn: Option<Connection>,
    open_failures: u32,
    last_open_failure: Option<Instant>,
    error_logs: bool,
}

impl Manifest {
    /// Creates a handle without touching the filesystem; call [`open`].
    ///
    /// [`open`]: Manifest::open
    pub fn new(path: PathBuf, error_logs: bool) -> Self {
        Self {
            path,
            conn: None,
            open_failures: 0,
            last_open_failure: None,
            error_logs,
        }
    }

    /// Opens the database and bootstraps the schema.
    ///
    /// Success clears the failure counters; failure records the attempt for
    /// the backoff window.
    pub fn open(&mut self) -> StoreResult<()> {
        match self.try_open() {
            Ok(conn) => {
                self.conn = Some(conn);
                self.open_failures = 0;
                self.last_open_failure = None;
                Ok(())
            }
            Err(err) => {
                self.open_failures += 1;
                self.last_open_failure = Some(Instant::now());
                if self.error_logs {
                    log::error!(
                        "manifest open failed ({}/{MAX_OPEN_ATTEMPTS}): {err}",
                        self.open_failures
                    );
                }
                Err(err)
            }
        }
    }

    fn try_open(&self) -> StoreResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.set_prepared_statement_cache_capacity(STATEMENT_CACHE_CAPACITY);
        conn.pragma_update(None, "journal_mode", "wal")?;
        conn.pragma_update(None, "synchronous", "normal")?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }

    /// Returns the open connection, re-opening under the backoff policy.
    fn conn(&mut self) -> StoreResult<&Connection> {
        if self.conn.is_none() {
            if self.open_failures >= MAX_OPEN_ATTEMPTS {
                return Err(StoreError::Unavailable);
            }
            let in_backoff = self
                .last_open_failure
                .is_some_and(|at| at.elapsed() < OPEN_RETRY_DELAY);
            if in_backoff {
                return Err(StoreError::Unavailable);
            }
            self.open()?;
        }
        self.conn.as_ref().ok_or(StoreError::Unavailable)
    }

    /// Finalizes cached statements and closes the database, retrying once on
    /// busy/locked.
    pub fn close(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        conn.flush_prepared_statement_cache();
        if let Err((conn, err)) = conn.close() {
            if self.error_logs {
                log::warn!("manifest close failed, retrying: {err}");
            }
            conn.flush_prepared_statement_cache();
            if let Err((_, err)) = conn.close() {
                if self.error_logs {
                    log::error!("manifest close failed: {err}");
                }
            }
        }
    }

    /// Whether a connection is currently open.
    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    /// Rewinds the backoff clock so tests can exercise the retry path
    /// without sleeping.
    #[cfg(test)]
    pub fn expire_backoff(&mut self) {
        self.last_open_failure = self
            .last_open_failure
            .map(|at| at - OPEN_RETRY_DELAY);
    }

    /// Deletes the manifest triad (main database, `-shm`, `-wal`).
    ///
    /// The connection must be closed first. Missing files are fine.
    pub fn delete_files(&self) -> StoreResult<()> {
        for suffix in ["", "-shm", "-wal"] {
            let mut os = self.path.clone().into_os_string();
            os.push(suffix);
            match fs::remove_file(PathBuf::from(os)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Inserts or replaces the row for `key`, setting both timestamps to now.
    ///
    /// `inline_data` carries `value` when `file_name` is absent and an empty
    /// blob otherwise.
    pub fn save(
        &mut self,
        key: &str,
        value: &[u8],
        file_name: Option<&str>,
        extended: Option<&[u8]>,
    ) -> StoreResult<()> {
        let now = unix_time();
        let inline: &[u8] = if file_name.is_some() { &[] } else { value };
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "INSERT OR REPLACE INTO manifest \
             (key, filename, size, inline_data, modification_time, last_access_time, extended_data) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        stmt.execute(rusqlite::params![
            key,
            file_name,
            value.len() as i64,
            inline,
            now,
            now,
            extended,
        ])?;
        Ok(())
    }

    /// Sets `last_access_time` for one key.
    pub fn update_access_time(&mut self, key: &str, now: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare_cached("UPDATE manifest SET last_access_time = ?1 WHERE key = ?2")?;
        stmt.execute(rusqlite::params![now, key])?;
        Ok(())
    }

    /// Sets `last_access_time` for many keys in one statement.
    pub fn update_access_times(&mut self, keys: &[&str], now: i64) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let sql = format!(
            "UPDATE manifest SET last_access_time = ?1 WHERE key IN ({})",
            in_list(2, keys.len())
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<&dyn ToSql> = Vec::with_capacity(keys.len() + 1);
        params.push(&now);
        params.extend(keys.iter().map(|k| k as &dyn ToSql));
        stmt.execute(&params[..])?;
        Ok(())
    }

    /// Removes the row for `key`.
    pub fn delete(&mut self, key: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("DELETE FROM manifest WHERE key = ?1")?;
        stmt.execute([key])?;
        Ok(())
    }

    /// Removes the rows for `keys` in one statement.
    pub fn delete_many(&mut self, keys: &[&str]) -> StoreResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let sql = format!("DELETE FROM manifest WHERE key IN ({})", in_list(1, keys.len()));
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = keys.iter().map(|k| k as &dyn ToSql).collect();
        stmt.execute(&params[..])?;
        Ok(())
    }

    /// Removes rows whose `size` exceeds `size`.
    pub fn delete_larger_than(&mut self, size: u64) -> StoreResult<()> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("DELETE FROM manifest WHERE size > ?1")?;
        stmt.execute([size as i64])?;
        Ok(())
    }

    /// Removes rows whose `last_access_time` is before `time`.
    pub fn delete_earlier_than(&mut self, time: i64) -> StoreResult<()> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("DELETE FROM manifest WHERE last_access_time < ?1")?;
        stmt.execute([time])?;
        Ok(())
    }

    /// Fetches one row; `exclude_inline` skips the `inline_data` projection.
    pub fn get_item(&mut self, key: &str, exclude_inline: bool) -> StoreResult<Option<Entry>> {
        let sql = if exclude_inline {
            "SELECT key, filename, size, modification_time, last_access_time, extended_data \
             FROM manifest WHERE key = ?1"
        } else {
            "SELECT key, filename, size, inline_data, modification_time, last_access_time, \
             extended_data FROM manifest WHERE key = ?1"
        };
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(sql)?;
        let entry = stmt
            .query_row([key], |row| row_to_entry(row, exclude_inline))
            .optional()?;
        Ok(entry)
    }

    /// Bulk row fetch. Returns an empty vector when nothing matches.
    pub fn get_items(&mut self, keys: &[&str], exclude_inline: bool) -> StoreResult<Vec<Entry>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let columns = if exclude_inline {
            "key, filename, size, modification_time, last_access_time, extended_data"
        } else {
            "key, filename, size, inline_data, modification_time, last_access_time, extended_data"
        };
        let sql = format!(
            "SELECT {columns} FROM manifest WHERE key IN ({})",
            in_list(1, keys.len())
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = keys.iter().map(|k| k as &dyn ToSql).collect();
        let rows = stmt.query_map(&params[..], |row| row_to_entry(row, exclude_inline))?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Returns only the inline bytes for `key`; `None` when the row is
    /// missing or holds no inline data.
    pub fn get_value(&mut self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT inline_data FROM manifest WHERE key = ?1")?;
        let value: Option<Option<Vec<u8>>> = stmt
            .query_row([key], |row| row.get(0))
            .optional()?;
        Ok(value.flatten().filter(|v| !v.is_empty()))
    }

    /// Returns the blob file name referenced by `key`, if any.
    pub fn get_file_name(&mut self, key: &str) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT filename FROM manifest WHERE key = ?1")?;
        let name: Option<Option<String>> = stmt
            .query_row([key], |row| row.get(0))
            .optional()?;
        Ok(name.flatten().filter(|n| !n.is_empty()))
    }

    /// Returns the blob file names referenced by `keys`.
    pub fn get_file_names(&mut self, keys: &[&str]) -> StoreResult<Vec<String>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT filename FROM manifest WHERE key IN ({}) AND filename IS NOT NULL",
            in_list(1, keys.len())
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let params: Vec<&dyn ToSql> = keys.iter().map(|k| k as &dyn ToSql).collect();
        let rows = stmt.query_map(&params[..], |row| row.get::<_, String>(0))?;
        collect_names(rows)
    }

    /// Blob file names for rows whose `size` exceeds `size`.
    pub fn get_file_names_larger_than(&mut self, size: u64) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT filename FROM manifest WHERE size > ?1 AND filename IS NOT NULL",
        )?;
        let rows = stmt.query_map([size as i64], |row| row.get::<_, String>(0))?;
        collect_names(rows)
    }

    /// Blob file names for rows last accessed before `time`.
    pub fn get_file_names_earlier_than(&mut self, time: i64) -> StoreResult<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT filename FROM manifest WHERE last_access_time < ?1 AND filename IS NOT NULL",
        )?;
        let rows = stmt.query_map([time], |row| row.get::<_, String>(0))?;
        collect_names(rows)
    }

    /// The LRU eviction cursor: up to `limit` rows projected to
    /// `(key, filename, size)`, least recently accessed first.
    pub fn get_size_infos(&mut self, limit: u32) -> StoreResult<Vec<SizeInfo>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            "SELECT key, filename, size FROM manifest \
             ORDER BY last_access_time ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map([i64::from(limit)], |row| {
            Ok(SizeInfo {
                key: row.get(0)?,
                file_name: row
                    .get::<_, Option<String>>(1)?
                    .filter(|n| !n.is_empty()),
                size: row.get::<_, i64>(2)?.max(0) as u64,
            })
        })?;
        let mut infos = Vec::new();
        for row in rows {
            infos.push(row?);
        }
        Ok(infos)
    }

    /// Number of rows with `key` (0 or 1).
    pub fn item_count(&mut self, key: &str) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare_cached("SELECT count(key) FROM manifest WHERE key = ?1")?;
        let count: i64 = stmt.query_row([key], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Total row count.
    pub fn total_count(&mut self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT count(*) FROM manifest")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Sum of the `size` column across all rows, as a 64-bit value.
    pub fn total_size(&mut self) -> StoreResult<u64> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached("SELECT sum(size) FROM manifest")?;
        let sum: Option<i64> = stmt.query_row([], |row| row.get(0))?;
        Ok(sum.unwrap_or(0).max(0) as u64)
    }

    /// Issues a passive WAL checkpoint.
    pub fn checkpoint(&mut self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        Ok(())
    }
}

impl Drop for Manifest {
    fn drop(&mut self) {
        self.close();
    }
}

/// Builds `?n, ?n+1, …` placeholders for an IN list.
fn in_list(first: usize, count: usize) -> String {
    let mut list = String::with_capacity(count * 4);
    for i in 0..count {
        if i > 0 {
            list.push_str(", ");
        }
        list.push('?');
        list.push_str(&(first + i).to_string());
    }
    list
}

fn collect_names(
    rows: impl Iterator<Item = rusqlite::Result<String>>,
) -> StoreResult<Vec<String>> {
    let mut names = Vec::new();
    for row in rows {
        let name = row?;
        if !name.is_empty() {
            names.push(name);
        }
    }
    Ok(names)
}

fn row_to_entry(row: &Row<'_>, exclude_inline: bool) -> rusqlite::Result<Entry> {
    let key: String = row.get(0)?;
    let file_name: Option<String> = row.get::<_, Option<String>>(1)?.filter(|n| !n.is_empty());
    let size: i64 = row.get(2)?;
    let (value, base) = if exclude_inline {
        (None, 3)
    } else {
        let inline: Option<Vec<u8>> = row.get(3)?;
        (inline.filter(|v| !v.is_empty()), 4)
    };
    Ok(Entry {
        key,
        value,
        file_name,
        size: size.max(0) as u64,
        modified_at: row.get(base)?,
        accessed_at: row.get(base + 1)?,
        extended_data: row.get(base + 2)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_manifest(dir: &Path) -> Manifest {
        let mut manifest = Manifest::new(dir.join("manifest.sqlite"), true);
        manifest.open().unwrap();
        manifest
    }

    #[test]
    fn test_open_creates_manifest_file() {
        let dir = tempdir().unwrap();
        let manifest = open_manifest(dir.path());
        assert!(manifest.is_open());
        assert!(dir.path().join("manifest.sqlite").exists());
    }

    #[test]
    fn test_save_and_get_item_inline() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[1, 2, 3], None, Some(&[9])).unwrap();
        let entry = manifest.get_item("a", false).unwrap().unwrap();

        assert_eq!(entry.key, "a");
        assert_eq!(entry.value, Some(vec![1, 2, 3]));
        assert_eq!(entry.file_name, None);
        assert_eq!(entry.size, 3);
        assert_eq!(entry.extended_data, Some(vec![9]));
        assert_eq!(entry.modified_at, entry.accessed_at);
    }

    #[test]
    fn test_save_file_backed_stores_empty_inline_blob() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[7; 10], Some("blob-a"), None).unwrap();
        let entry = manifest.get_item("a", false).unwrap().unwrap();

        assert_eq!(entry.file_name.as_deref(), Some("blob-a"));
        assert_eq!(entry.value, None);
        assert_eq!(entry.size, 10);
        assert_eq!(manifest.get_value("a").unwrap(), None);
    }

    #[test]
    fn test_get_item_exclude_inline() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[1, 2, 3], None, None).unwrap();
        let entry = manifest.get_item("a", true).unwrap().unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(entry.size, 3);
    }

    #[test]
    fn test_insert_or_replace_keeps_one_row() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[1], None, None).unwrap();
        manifest.save("a", &[2, 2], None, None).unwrap();

        assert_eq!(manifest.total_count().unwrap(), 1);
        let entry = manifest.get_item("a", false).unwrap().unwrap();
        assert_eq!(entry.value, Some(vec![2, 2]));
        assert_eq!(entry.size, 2);
    }

    #[test]
    fn test_bulk_get_and_delete() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[1], None, None).unwrap();
        manifest.save("b", &[2], Some("blob-b"), None).unwrap();
        manifest.save("c", &[3], None, None).unwrap();

        let entries = manifest.get_items(&["a", "b", "missing"], false).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(manifest.get_file_names(&["a", "b", "c"]).unwrap(), vec!["blob-b"]);

        manifest.delete_many(&["a", "b"]).unwrap();
        assert_eq!(manifest.total_count().unwrap(), 1);
        assert!(manifest.get_item("a", false).unwrap().is_none());
    }

    #[test]
    fn test_access_time_updates() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("a", &[1], None, None).unwrap();
        manifest.save("b", &[2], None, None).unwrap();
        manifest.update_access_time("a", 5_000).unwrap();
        manifest.update_access_times(&["b"], 6_000).unwrap();

        assert_eq!(manifest.get_item("a", true).unwrap().unwrap().accessed_at, 5_000);
        assert_eq!(manifest.get_item("b", true).unwrap().unwrap().accessed_at, 6_000);
    }

    #[test]
    fn test_size_infos_orders_by_access_time() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("old", &[1], None, None).unwrap();
        manifest.save("mid", &[2, 2], Some("blob-mid"), None).unwrap();
        manifest.save("new", &[3; 3], None, None).unwrap();
        manifest.update_access_time("old", 100).unwrap();
        manifest.update_access_time("mid", 200).unwrap();
        manifest.update_access_time("new", 300).unwrap();

        let infos = manifest.get_size_infos(2).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].key, "old");
        assert_eq!(infos[0].file_name, None);
        assert_eq!(infos[1].key, "mid");
        assert_eq!(infos[1].file_name.as_deref(), Some("blob-mid"));
        assert_eq!(infos[1].size, 2);
    }

    #[test]
    fn test_bounded_deletes_and_scans() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        manifest.save("small", &[1], None, None).unwrap();
        manifest.save("large", &[1; 100], Some("blob-large"), None).unwrap();
        manifest.update_access_time("small", 100).unwrap();
        manifest.update_access_time("large", 200).unwrap();

        assert_eq!(
            manifest.get_file_names_larger_than(50).unwrap(),
            vec!["blob-large"]
        );
        assert_eq!(
            manifest.get_file_names_earlier_than(150).unwrap(),
            Vec::<String>::new()
        );

        manifest.delete_larger_than(50).unwrap();
        assert_eq!(manifest.total_count().unwrap(), 1);

        manifest.delete_earlier_than(150).unwrap();
        assert_eq!(manifest.total_count().unwrap(), 0);
    }

    #[test]
    fn test_totals_are_64_bit_sums() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());

        assert_eq!(manifest.total_size().unwrap(), 0);
        manifest.save("a", &[0; 10], None, None).unwrap();
        manifest.save("b", &[0; 30], None, None).unwrap();

        assert_eq!(manifest.total_count().unwrap(), 2);
        assert_eq!(manifest.total_size().unwrap(), 40);
        assert_eq!(manifest.item_count("a").unwrap(), 1);
        assert_eq!(manifest.item_count("zzz").unwrap(), 0);
    }

    #[test]
    fn test_checkpoint_succeeds() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());
        manifest.save("a", &[1], None, None).unwrap();
        manifest.checkpoint().unwrap();
    }

    #[test]
    fn test_close_and_reopen() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());
        manifest.save("a", &[1], None, None).unwrap();

        manifest.close();
        assert!(!manifest.is_open());

        // The next query re-opens transparently.
        assert_eq!(manifest.total_count().unwrap(), 1);
        assert!(manifest.is_open());
    }

    #[test]
    fn test_delete_files_removes_triad() {
        let dir = tempdir().unwrap();
        let mut manifest = open_manifest(dir.path());
        manifest.save("a", &[1], None, None).unwrap();
        manifest.close();

        manifest.delete_files().unwrap();
        assert!(!dir.path().join("manifest.sqlite").exists());
        assert!(!dir.path().join("manifest.sqlite-wal").exists());

        // Idempotent on missing files.
        manifest.delete_files().unwrap();
    }

    #[test]
    fn test_backoff_after_open_failure() {
        let dir = tempdir().unwrap();
        // Opening a directory as a database fails.
        let blocked = dir.path().join("occupied");
        fs::create_dir(&blocked).unwrap();
        let mut manifest = Manifest::new(blocked, false);

        assert!(manifest.open().is_err());
        assert_eq!(manifest.open_failures, 1);

        // Within the backoff window no open is attempted.
        assert!(matches!(
            manifest.total_count(),
            Err(StoreError::Unavailable)
        ));
        assert_eq!(manifest.open_failures, 1);

        // Once the window elapses another attempt is made (and fails again).
        manifest.expire_backoff();
        assert!(manifest.total_count().is_err());
        assert_eq!(manifest.open_failures, 2);
    }

    #[test]
    fn test_unavailable_after_retry_budget_exhausted() {
        let dir = tempdir().unwrap();
        let blocked = dir.path().join("occupied");
        fs::create_dir(&blocked).unwrap();
        let mut manifest = Manifest::new(blocked, false);

        for _ in 0..MAX_OPEN_ATTEMPTS {
            let _ = manifest.open();
        }
        manifest.expire_backoff();
        // The budget is spent; even an elapsed window reports unavailable.
        assert!(matches!(
            manifest.total_count(),
            Err(StoreError::Unavailable)
        ));
        assert_eq!(manifest.open_failures, MAX_OPEN_ATTEMPTS);
    }

    #[test]
    fn test_recovery_after_transient_failure() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("later.sqlite");
        let blocker = dir.path().join("later.sqlite");
        fs::create_dir(&blocker).unwrap();

        let mut manifest = Manifest::new(path.clone(), false);
        assert!(manifest.open().is_err());

        // The filesystem issue clears and the backoff window elapses.
        fs::remove_dir(&blocker).unwrap();
        manifest.expire_backoff();

        assert_eq!(manifest.total_count().unwrap(), 0);
        assert!(manifest.is_open());
        assert_eq!(manifest.open_failures, 0);
    }

    #[test]
    fn test_in_list_placeholders() {
        assert_eq!(in_list(1, 1), "?1");
        assert_eq!(in_list(2, 3), "?2, ?3, ?4");
    }
}
