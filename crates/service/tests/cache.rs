use extract::{ExtractionStats, PartialEntityBundle, SchemaRegistry, StructuredEntityBundle};
use ingest::{DocumentFormat, RawDocument};
use service::config::CacheConfig;
use service::{CacheEntry, CacheError, CacheStatus, CacheStore, Fingerprint, Metrics, PARSER_VERSION};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
enum TestError {
    #[error("cache: {0}")]
    Cache(#[from] CacheError),
    #[error("compute failed")]
    Compute,
}

fn store(dir: &Path) -> CacheStore {
    store_with(dir, |_| {})
}

fn store_with(dir: &Path, tweak: impl FnOnce(&mut CacheConfig)) -> CacheStore {
    let mut config = CacheConfig {
        dir: dir.to_path_buf(),
        lock_poll_ms: 10,
        ..CacheConfig::default()
    };
    tweak(&mut config);
    CacheStore::open(config, Metrics::new()).unwrap()
}

fn fp(content: &str) -> Fingerprint {
    Fingerprint::compute(&ingest::hash_bytes(content.as_bytes()), PARSER_VERSION, 1)
}

fn entry(fp: &Fingerprint) -> CacheEntry {
    let schema = SchemaRegistry::builtin().latest().unwrap();
    let doc = RawDocument {
        source: PathBuf::from("report.docx"),
        content_hash: "0".repeat(64),
        format: DocumentFormat::Docx,
        page_count: 1,
        segments: Vec::new(),
        tables: Vec::new(),
    };
    let bundle = StructuredEntityBundle::from_partial(PartialEntityBundle::new(), &schema, ExtractionStats::default());
    CacheEntry::new(fp.clone(), &doc, bundle)
}

async fn counted(
    calls: &AtomicUsize,
    fp: &Fingerprint,
    delay: Duration,
) -> Result<CacheEntry, TestError> {
    calls.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(delay).await;
    Ok(entry(fp))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_callers_share_one_computation() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(store(dir.path()));
    let calls = Arc::new(AtomicUsize::new(0));
    let key = fp("shared");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = cache.clone();
        let calls = calls.clone();
        let key = key.clone();
        handles.push(tokio::spawn(async move {
            cache
                .get_or_compute(&key, || counted(&calls, &key, Duration::from_millis(50)))
                .await
                .map(|(entry, status)| (entry.header.created_at, status))
        }));
    }

    let mut statuses = Vec::new();
    let mut created = Vec::new();
    for handle in handles {
        let (at, status) = handle.await.unwrap().unwrap();
        statuses.push(status);
        created.push(at);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Computed).count(), 1);
    assert!(created.iter().all(|at| *at == created[0]));
    assert_eq!(cache.metrics().computations(), 1);
}

#[tokio::test]
async fn second_store_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let calls = AtomicUsize::new(0);
    let key = fp("persisted");

    let first = store(dir.path());
    let (written, status) = first
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Computed);
    first.close();

    let second = store(dir.path());
    let (read, status) = second
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::DiskHit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(read.bundle, written.bundle);
    assert_eq!(read.header.body_sha256, written.header.body_sha256);
    assert!(!read.header.body_sha256.is_empty());

    let (_, status) = second
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::MemoryHit);
}

#[tokio::test]
async fn failed_computation_leaves_nothing_behind() {
    let dir = tempfile::tempdir().unwrap();
    let cache = store(dir.path());
    let key = fp("fails once");

    let result = cache
        .get_or_compute(&key, || async { Err::<CacheEntry, _>(TestError::Compute) })
        .await;
    assert!(matches!(result, Err(TestError::Compute)));
    assert!(!cache.disk().entry_path(&key).exists());
    assert!(!cache.disk().lock_path(&key).exists());

    let calls = AtomicUsize::new(0);
    let (_, status) = cache
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Computed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn corrupt_entry_is_recomputed_and_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let key = fp("damaged");
    let calls = AtomicUsize::new(0);

    let first = store(dir.path());
    first
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    first.close();

    let path = first.disk().entry_path(&key);
    let mut bytes = std::fs::read(&path).unwrap();
    let last = bytes.len() - 2;
    bytes[last] ^= 0x5a;
    std::fs::write(&path, &bytes).unwrap();

    let second = store(dir.path());
    let (_, status) = second
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::Computed);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(second.metrics().snapshot().corrupt_entries, 1);

    let third = store(dir.path());
    let (_, status) = third
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    assert_eq!(status, CacheStatus::DiskHit);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn different_fingerprints_do_not_block_each_other() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(store(dir.path()));
    let slow_key = fp("slow");
    let fast_key = fp("fast");
    let (release, released) = tokio::sync::oneshot::channel::<()>();

    let slow = {
        let cache = cache.clone();
        let slow_key = slow_key.clone();
        tokio::spawn(async move {
            cache
                .get_or_compute(&slow_key, || async {
                    released.await.ok();
                    Ok::<_, TestError>(entry(&slow_key))
                })
                .await
                .map(|(_, status)| status)
        })
    };

    let calls = AtomicUsize::new(0);
    let fast = tokio::time::timeout(
        Duration::from_secs(5),
        cache.get_or_compute(&fast_key, || counted(&calls, &fast_key, Duration::ZERO)),
    )
    .await
    .expect("unrelated fingerprint must not wait on the slow one")
    .unwrap();
    assert_eq!(fast.1, CacheStatus::Computed);

    release.send(()).unwrap();
    assert_eq!(slow.await.unwrap().unwrap(), CacheStatus::Computed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waits_for_another_process_holding_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let key = fp("held elsewhere");
    let cache = store(dir.path());
    let lock_path = cache.disk().lock_path(&key);
    std::fs::write(&lock_path, b"pid=999999").unwrap();

    // The "other process" finishes its write, then releases the lock
    let writer = {
        let disk = cache.disk().clone();
        let key = key.clone();
        let lock_path = lock_path.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            disk.write(entry(&key)).unwrap();
            std::fs::remove_file(&lock_path).unwrap();
        })
    };

    let calls = AtomicUsize::new(0);
    let (_, status) = cache
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await
        .unwrap();
    writer.await.unwrap();

    assert_eq!(status, CacheStatus::DiskHit);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stale_lock_is_broken() {
    let dir = tempfile::tempdir().unwrap();
    let key = fp("abandoned");
    let cache = store_with(dir.path(), |c| c.lock_stale_secs = 0);
    std::fs::write(cache.disk().lock_path(&key), b"pid=999999").unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let calls = AtomicUsize::new(0);
    let (_, status) = tokio::time::timeout(
        Duration::from_secs(5),
        cache.get_or_compute(&key, || counted(&calls, &key, Duration::ZERO)),
    )
    .await
    .expect("stale lock must not block forever")
    .unwrap();

    assert_eq!(status, CacheStatus::Computed);
    assert!(!cache.disk().lock_path(&key).exists());
}

#[tokio::test]
async fn closed_store_refuses_lookups() {
    let dir = tempfile::tempdir().unwrap();
    let cache = store(dir.path());
    cache.close();
    assert!(!cache.is_open());

    let key = fp("closed");
    let calls = AtomicUsize::new(0);
    let result = cache
        .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
        .await;
    assert!(matches!(result, Err(TestError::Cache(CacheError::Closed))));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn stats_count_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let cache = store(dir.path());
    let calls = AtomicUsize::new(0);
    for name in ["a", "b", "c"] {
        let key = fp(name);
        cache
            .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
            .await
            .unwrap();
    }

    let stats = cache.stats().await.unwrap();
    assert_eq!(stats.memory_entries, 3);
    assert_eq!(stats.disk_entries, 3);
    assert!(stats.disk_bytes > 0);
    assert_eq!(stats.dir, dir.path());

    let fresh = store(dir.path()).stats().await.unwrap();
    assert_eq!(fresh.memory_entries, 0);
    assert_eq!(fresh.disk_entries, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn long_computation_keeps_its_lock() {
    let dir = tempfile::tempdir().unwrap();
    let key = fp("slow across processes");
    let calls = Arc::new(AtomicUsize::new(0));
    // Two stores on one directory stand in for two processes
    let owner = Arc::new(store_with(dir.path(), |c| c.lock_stale_secs = 1));
    let waiter = Arc::new(store_with(dir.path(), |c| c.lock_stale_secs = 1));

    let first = {
        let owner = owner.clone();
        let calls = calls.clone();
        let key = key.clone();
        tokio::spawn(async move {
            owner
                .get_or_compute(&key, || counted(&calls, &key, Duration::from_millis(2500)))
                .await
                .map(|(_, status)| status)
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(owner.disk().lock_path(&key).exists());

    let second = {
        let calls = calls.clone();
        let key = key.clone();
        tokio::spawn(async move {
            waiter
                .get_or_compute(&key, || counted(&calls, &key, Duration::ZERO))
                .await
                .map(|(_, status)| status)
        })
    };

    assert_eq!(first.await.unwrap().unwrap(), CacheStatus::Computed);
    assert_eq!(second.await.unwrap().unwrap(), CacheStatus::DiskHit);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!owner.disk().lock_path(&key).exists());
}
