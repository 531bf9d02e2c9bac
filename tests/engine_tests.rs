use blobstash::{StorageMode, Store, StoreError};
use std::fs;
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_mixed_mode_inline_round_trip() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("a", &[0x01, 0x02, 0x03], None, None).unwrap();

    let entry = store.item("a").unwrap().unwrap();
    assert_eq!(entry.value, Some(vec![0x01, 0x02, 0x03]));
    assert_eq!(entry.extended_data, None);
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.total_size().unwrap(), 3);
}

#[test]
fn test_mixed_mode_file_backed_with_extended_data() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("a", &[0x01, 0x02, 0x03], None, None).unwrap();
    store
        .save("a", &[0xAA; 30_000], Some("file-a"), Some(&[0xEE, 0xEF]))
        .unwrap();

    let blob = dir.path().join("data").join("file-a");
    assert_eq!(fs::metadata(&blob).unwrap().len(), 30_000);

    let info = store.item_info("a").unwrap().unwrap();
    assert_eq!(info.file_name.as_deref(), Some("file-a"));
    assert_eq!(info.size, 30_000);

    let entry = store.item("a").unwrap().unwrap();
    assert_eq!(entry.value, Some(vec![0xAA; 30_000]));
    assert_eq!(entry.extended_data, Some(vec![0xEE, 0xEF]));
}

#[test]
fn test_round_trip_in_every_mode() {
    for mode in [StorageMode::File, StorageMode::Sqlite, StorageMode::Mixed] {
        let dir = tempdir().unwrap();
        let mut store = Store::open(dir.path(), mode).unwrap();

        let file_name = match mode {
            StorageMode::Sqlite => None,
            _ => Some("blob-k"),
        };
        store.save("k", b"payload", file_name, None).unwrap();

        let entry = store.item("k").unwrap().unwrap();
        assert_eq!(entry.value.as_deref(), Some(&b"payload"[..]), "mode {mode:?}");
        assert_eq!(store.item_value("k").unwrap().unwrap(), b"payload");
    }
}

#[test]
fn test_replace_keeps_single_row_and_latest_value() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("k", &[1; 10], Some("blob-1"), None).unwrap();
    store.save("k", &[2; 20], Some("blob-2"), None).unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.item("k").unwrap().unwrap().value, Some(vec![2; 20]));
    assert!(!dir.path().join("data").join("blob-1").exists());
}

#[test]
fn test_access_time_refreshes_on_reads_only() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("k", &[1], None, None).unwrap();
    let saved = store.item_info("k").unwrap().unwrap();
    assert_eq!(saved.modified_at, saved.accessed_at);

    // Timestamps have second granularity; make sure the clock advances.
    thread::sleep(Duration::from_millis(1100));

    // Metadata reads do not touch the access time.
    let info = store.item_info("k").unwrap().unwrap();
    assert_eq!(info.accessed_at, saved.accessed_at);

    // Value reads refresh it.
    store.item("k").unwrap().unwrap();
    let refreshed = store.item_info("k").unwrap().unwrap();
    assert!(refreshed.accessed_at > saved.accessed_at);
    assert_eq!(refreshed.modified_at, saved.modified_at);

    thread::sleep(Duration::from_millis(1100));
    store.item_value("k").unwrap().unwrap();
    let again = store.item_info("k").unwrap().unwrap();
    assert!(again.accessed_at > refreshed.accessed_at);
}

#[test]
fn test_lost_blob_reported_absent_and_row_repaired() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("k", &[9; 100], Some("f"), None).unwrap();
    fs::remove_file(dir.path().join("data").join("f")).unwrap();

    assert!(store.item("k").unwrap().is_none());
    assert!(!store.contains("k").unwrap());
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn test_remove_all_then_fresh_save() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("k", &[1; 50_000], Some("blob-k"), None).unwrap();
    store.remove_all().unwrap();

    assert_eq!(store.count().unwrap(), 0);
    assert!(!store.contains("k").unwrap());
    assert!(!dir.path().join("data").join("blob-k").exists());

    store.save("k", &[2], None, None).unwrap();
    assert_eq!(store.item("k").unwrap().unwrap().value, Some(vec![2]));
}

#[test]
fn test_remove_all_is_idempotent() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("k", &[1], None, None).unwrap();
    store.remove_all().unwrap();
    store.remove_all().unwrap();

    assert_eq!(store.count().unwrap(), 0);
    store.save("k", &[1], None, None).unwrap();
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn test_bulk_reads_and_integrity_repair() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("a", &[1], None, None).unwrap();
    store.save("b", &[2; 10], Some("blob-b"), None).unwrap();
    store.save("c", &[3; 10], Some("blob-c"), None).unwrap();

    let mut entries = store.items(&["a", "b", "c"]).unwrap();
    entries.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[1].value, Some(vec![2; 10]));

    // Losing one blob drops that entry from the result and the index.
    fs::remove_file(dir.path().join("data").join("blob-b")).unwrap();
    let entries = store.items(&["a", "b", "c"]).unwrap();
    let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
    assert!(keys.contains(&"a"));
    assert!(keys.contains(&"c"));
    assert!(!keys.contains(&"b"));
    assert!(!store.contains("b").unwrap());
}

#[test]
fn test_bulk_infos_skip_values() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("a", &[1, 1], None, None).unwrap();
    store.save("b", &[2; 10], Some("blob-b"), None).unwrap();

    let infos = store.item_infos(&["a", "b"]).unwrap();
    assert_eq!(infos.len(), 2);
    assert!(infos.iter().all(|info| info.value.is_none()));
}

#[test]
fn test_empty_key_rejected_across_operations() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    assert!(matches!(store.item(""), Err(StoreError::BadArgument(_))));
    assert!(matches!(store.item_info(""), Err(StoreError::BadArgument(_))));
    assert!(matches!(store.item_value(""), Err(StoreError::BadArgument(_))));
    assert!(matches!(store.remove(""), Err(StoreError::BadArgument(_))));
    assert!(matches!(store.contains(""), Err(StoreError::BadArgument(_))));
}

#[test]
fn test_size_accounting_tracks_rows() {
    let dir = tempdir().unwrap();
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();

    store.save("a", &[0; 10], None, None).unwrap();
    store.save("b", &[0; 30], Some("blob-b"), None).unwrap();
    assert_eq!(store.count().unwrap(), 2);
    assert_eq!(store.total_size().unwrap(), 40);

    store.save("a", &[0; 5], None, None).unwrap();
    assert_eq!(store.total_size().unwrap(), 35);

    store.remove("b").unwrap();
    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(store.total_size().unwrap(), 5);
}

#[test]
fn test_store_reopens_existing_cache() {
    let dir = tempdir().unwrap();
    {
        let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();
        store.save("k", &[1; 100], Some("blob-k"), None).unwrap();
    }
    let mut store = Store::open(dir.path(), StorageMode::Mixed).unwrap();
    assert_eq!(store.item("k").unwrap().unwrap().value, Some(vec![1; 100]));
}
