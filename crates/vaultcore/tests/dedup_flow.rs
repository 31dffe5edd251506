//! End-to-end behavior of the dedup store: link/unlink, refcounts,
//! garbage collection, reconciliation and storage accounting.

use std::io::Cursor;
use std::time::Duration;

use tempfile::TempDir;
use vaultcas::{BlobStore, ContentHash};
use vaultcore::{Database, FileRecord, FileRegistry, StoreError, UploadPolicy};

fn memory_registry() -> (TempDir, FileRegistry) {
    let dir = TempDir::new().unwrap();
    let store = BlobStore::at_path(dir.path().join("cas")).unwrap();
    let db = Database::open_memory().unwrap();
    let registry = FileRegistry::new(db, store, UploadPolicy::unrestricted());
    (dir, registry)
}

fn file_registry() -> (TempDir, FileRegistry) {
    let dir = TempDir::new().unwrap();
    let store = BlobStore::at_path(dir.path().join("cas")).unwrap();
    let db = Database::open(dir.path().join("vault.db")).unwrap();
    let registry = FileRegistry::new(db, store, UploadPolicy::unrestricted());
    (dir, registry)
}

fn upload(registry: &FileRegistry, name: &str, data: &[u8]) -> FileRecord {
    registry
        .link(name, "application/octet-stream", Cursor::new(data.to_vec()))
        .unwrap()
}

#[test]
fn identical_uploads_share_one_blob() {
    let (_dir, registry) = memory_registry();

    let a = upload(&registry, "a.bin", b"identical bytes");
    let b = upload(&registry, "b.bin", b"identical bytes");

    assert_ne!(a.id, b.id);
    assert_eq!(a.content_id, b.content_id);

    let entry = registry.blob(&a.content_id).unwrap().unwrap();
    assert_eq!(entry.ref_count, 2);
    assert_eq!(registry.list().unwrap().len(), 2);
}

#[test]
fn distinct_uploads_get_distinct_blobs() {
    let (_dir, registry) = memory_registry();

    let a = upload(&registry, "a.bin", b"first payload");
    let b = upload(&registry, "b.bin", b"second payload");

    assert_ne!(a.content_id, b.content_id);
    assert_eq!(registry.blob(&a.content_id).unwrap().unwrap().ref_count, 1);
    assert_eq!(registry.blob(&b.content_id).unwrap().unwrap().ref_count, 1);
}

#[test]
fn blob_survives_until_last_unlink() {
    let (_dir, registry) = memory_registry();

    let a = upload(&registry, "a.bin", b"shared content");
    let b = upload(&registry, "b.bin", b"shared content");
    let hash = a.content_id.clone();

    registry.unlink(&a.id).unwrap();

    let entry = registry.blob(&hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 1);
    assert!(registry.store().exists(&hash));

    registry.unlink(&b.id).unwrap();

    assert!(registry.blob(&hash).unwrap().is_none());
    assert!(!registry.store().exists(&hash));
}

#[test]
fn unlink_is_not_repeatable() {
    let (_dir, registry) = memory_registry();

    let record = upload(&registry, "once.bin", b"only delete once");
    registry.unlink(&record.id).unwrap();

    assert!(matches!(
        registry.unlink(&record.id),
        Err(StoreError::NotFound(_))
    ));

    // The failed second unlink touched nothing
    assert!(registry.blob(&record.content_id).unwrap().is_none());
}

#[test]
fn concurrent_identical_uploads_produce_one_blob() {
    use std::sync::Arc;
    use std::thread;

    let (_dir, registry) = file_registry();
    let registry = Arc::new(registry);
    let expected = ContentHash::from_data(b"raced payload");

    const WORKERS: usize = 8;
    let mut handles = vec![];
    for i in 0..WORKERS {
        let registry = registry.clone();
        handles.push(thread::spawn(move || {
            registry
                .link(
                    &format!("worker-{i}.bin"),
                    "application/octet-stream",
                    Cursor::new(b"raced payload".to_vec()),
                )
                .unwrap()
        }));
    }

    for handle in handles {
        let record = handle.join().unwrap();
        assert_eq!(record.content_id, expected);
    }

    let entry = registry.blob(&expected).unwrap().unwrap();
    assert_eq!(entry.ref_count, WORKERS as u64);
    assert_eq!(registry.list().unwrap().len(), WORKERS);
    assert!(registry.store().exists(&expected));
}

#[test]
fn reconcile_keeps_earliest_record() {
    let (_dir, registry) = memory_registry();

    let oldest = upload(&registry, "first.bin", b"duplicated thrice");
    std::thread::sleep(Duration::from_millis(5));
    let middle = upload(&registry, "second.bin", b"duplicated thrice");
    std::thread::sleep(Duration::from_millis(5));
    let newest = upload(&registry, "third.bin", b"duplicated thrice");

    let hash = oldest.content_id.clone();
    assert_eq!(registry.blob(&hash).unwrap().unwrap().ref_count, 3);

    let report = registry.reconcile().unwrap();
    assert_eq!(report.removed_count, 2);
    assert_eq!(report.affected_content_ids, vec![hash.clone()]);

    let remaining = registry.list().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, oldest.id);

    assert_eq!(registry.blob(&hash).unwrap().unwrap().ref_count, 1);
    assert!(registry.get(&middle.id).is_err());
    assert!(registry.get(&newest.id).is_err());
}

#[test]
fn reconcile_on_clean_registry_is_a_noop() {
    let (_dir, registry) = memory_registry();

    upload(&registry, "a.bin", b"unique one");
    upload(&registry, "b.bin", b"unique two");

    let report = registry.reconcile().unwrap();
    assert_eq!(report.removed_count, 0);
    assert!(report.affected_content_ids.is_empty());
    assert_eq!(registry.list().unwrap().len(), 2);
}

#[test]
fn stats_track_logical_and_physical_bytes() {
    let (_dir, registry) = memory_registry();

    // Scenario: upload "hello" twice, then delete both
    let a = upload(&registry, "a.txt", b"hello");
    let b = upload(&registry, "b.txt", b"hello");

    let stats = registry.stats().unwrap();
    assert_eq!(stats.logical_total, 10);
    assert_eq!(stats.physical_total, 5);
    assert_eq!(stats.savings, 5);
    assert_eq!(stats.dedup_ratio, 0.5);

    registry.unlink(&a.id).unwrap();

    let stats = registry.stats().unwrap();
    assert_eq!(stats.logical_total, 5);
    assert_eq!(stats.physical_total, 5);
    assert_eq!(stats.savings, 0);
    assert_eq!(stats.dedup_ratio, 0.0);

    registry.unlink(&b.id).unwrap();

    let stats = registry.stats().unwrap();
    assert_eq!(stats.logical_total, 0);
    assert_eq!(stats.physical_total, 0);
    assert_eq!(stats.savings, 0);
    assert_eq!(stats.dedup_ratio, 0.0);
}

#[test]
fn logical_never_less_than_physical() {
    let (_dir, registry) = memory_registry();

    upload(&registry, "x1.bin", b"xxxx");
    upload(&registry, "x2.bin", b"xxxx");
    upload(&registry, "y.bin", b"yyyyyyyy");

    let stats = registry.stats().unwrap();
    assert_eq!(stats.logical_total, 16);
    assert_eq!(stats.physical_total, 12);
    assert!(stats.logical_total >= stats.physical_total);
}

#[test]
fn state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let cas_path = dir.path().join("cas");
    let db_path = dir.path().join("vault.db");

    let (record_id, hash) = {
        let store = BlobStore::at_path(&cas_path).unwrap();
        let db = Database::open(&db_path).unwrap();
        let registry = FileRegistry::new(db, store, UploadPolicy::unrestricted());

        upload(&registry, "keep.bin", b"durable content");
        let record = upload(&registry, "keep2.bin", b"durable content");
        (record.id, record.content_id)
    };

    // Fresh handles over the same durable state
    let store = BlobStore::at_path(&cas_path).unwrap();
    let db = Database::open(&db_path).unwrap();
    let registry = FileRegistry::new(db, store, UploadPolicy::unrestricted());

    let entry = registry.blob(&hash).unwrap().unwrap();
    assert_eq!(entry.ref_count, 2);
    assert_eq!(registry.list().unwrap().len(), 2);

    // Refcount arithmetic still works across the restart
    registry.unlink(&record_id).unwrap();
    assert_eq!(registry.blob(&hash).unwrap().unwrap().ref_count, 1);
}

#[test]
fn sensitive_payload_is_stored_verbatim() {
    use vaultcore::SensitiveReport;

    let (_dir, registry) = memory_registry();

    let scan = SensitiveReport {
        detected: true,
        markers: vec!["iban".to_string()],
        summary: "1 marker found".to_string(),
    };
    let record = registry
        .link_with_scan(
            "statement.pdf",
            "application/pdf",
            Cursor::new(b"bank stuff".to_vec()),
            scan.clone(),
        )
        .unwrap();

    let got = registry.get(&record.id).unwrap();
    assert_eq!(got.sensitive, scan);
}

#[test]
fn oversized_stream_is_cut_off_at_the_cap() {
    use std::io::Read;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingReader {
        inner: Cursor<Vec<u8>>,
        read: Arc<AtomicU64>,
    }
    impl Read for CountingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let n = self.inner.read(buf)?;
            self.read.fetch_add(n as u64, Ordering::Relaxed);
            Ok(n)
        }
    }

    let dir = TempDir::new().unwrap();
    let store = BlobStore::at_path(dir.path().join("cas")).unwrap();
    let db = Database::open_memory().unwrap();
    let policy = UploadPolicy {
        max_upload_bytes: Some(10),
        ..UploadPolicy::unrestricted()
    };
    let registry = FileRegistry::new(db, store, policy);

    let read = Arc::new(AtomicU64::new(0));
    let reader = CountingReader {
        inner: Cursor::new(vec![0u8; 1024 * 1024]),
        read: read.clone(),
    };

    let err = registry
        .link("big.bin", "application/octet-stream", reader)
        .unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));

    // One chunk at most was consumed, not the whole megabyte
    assert!(read.load(Ordering::Relaxed) <= 64 * 1024);

    assert_eq!(registry.stats().unwrap().physical_total, 0);
    assert!(registry.list().unwrap().is_empty());
}

#[test]
fn unlink_tolerates_missing_physical_file() {
    let (_dir, registry) = memory_registry();

    let record = upload(&registry, "ghost.bin", b"will vanish");
    let hash = record.content_id.clone();

    // Filesystem diverges: bytes disappear while the ledger still
    // claims them. Unlink must converge the ledger anyway.
    registry.store().remove(&hash).unwrap();

    registry.unlink(&record.id).unwrap();
    assert!(registry.blob(&hash).unwrap().is_none());
}
