mod common;

use common::{CountingService, FULL_REPLY, paragraph, report_docx, write};
use extract::{EntitySchema, FieldValue, SchemaRegistry, ServiceError, Strategy};
use service::{CacheStatus, CacheStore, Metrics, ParseError, ParseService};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

fn parse_service(cache_dir: &Path, understanding: Arc<CountingService>) -> ParseService {
    let config = common::config(cache_dir);
    let cache = Arc::new(CacheStore::open(config.cache.clone(), Metrics::new()).unwrap());
    ParseService::with_service(understanding, &config, cache)
}

fn entry_count(cache_dir: &Path) -> usize {
    std::fs::read_dir(cache_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|x| x == "entry"))
        .count()
}

#[tokio::test]
async fn parses_once_then_serves_from_both_tiers() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("Intended for coronary use."));

    let understanding = CountingService::replying(FULL_REPLY);
    let service = parse_service(cache_dir.path(), understanding.clone());

    let first = service.parse(&path, 1).await.unwrap();
    assert_eq!(first.meta.cache_status, CacheStatus::Computed);
    assert!(first.completeness >= 0.8, "completeness {}", first.completeness);
    assert_eq!(first.meta.pages, 2);
    assert_eq!(first.meta.schema_version, 1);
    assert_eq!(understanding.calls(), 1);
    assert_eq!(
        first.bundle.first_value("DeviceContext", "device_class"),
        Some(&FieldValue::Enum("III".into()))
    );

    let second = service.parse(&path, 1).await.unwrap();
    assert_eq!(second.meta.cache_status, CacheStatus::MemoryHit);
    assert_eq!(understanding.calls(), 1);
    assert_eq!(second.bundle, first.bundle);

    // A fresh process sees the persisted entry
    let understanding = CountingService::replying(FULL_REPLY);
    let restarted = parse_service(cache_dir.path(), understanding.clone());
    let third = restarted.parse(&path, 1).await.unwrap();
    assert_eq!(third.meta.cache_status, CacheStatus::DiskHit);
    assert_eq!(understanding.calls(), 0);
    assert_eq!(third.bundle, first.bundle);
    assert_eq!(third.meta.created_at, first.meta.created_at);
    assert_eq!(third.meta.fingerprint, first.meta.fingerprint);
}

#[tokio::test]
async fn identical_input_gives_identical_bundles() {
    let docs = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("Manufactured in Germany."));

    let mut bundles = Vec::new();
    for _ in 0..2 {
        let cache_dir = tempfile::tempdir().unwrap();
        let service = parse_service(cache_dir.path(), CountingService::replying(FULL_REPLY));
        let outcome = service.parse(&path, 1).await.unwrap();
        assert_eq!(outcome.meta.cache_status, CacheStatus::Computed);
        bundles.push(outcome);
    }

    assert_eq!(bundles[0].bundle, bundles[1].bundle);
    assert_eq!(bundles[0].meta.fingerprint, bundles[1].meta.fingerprint);
    assert_eq!(bundles[0].completeness, bundles[1].completeness);
}

#[tokio::test]
async fn fingerprint_follows_content_and_schema() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let original = write(docs.path(), "a.docx", &report_docx("Revision A."));
    let same_bytes = write(docs.path(), "copy.docx", &report_docx("Revision A."));
    let edited = write(docs.path(), "b.docx", &report_docx("Revision B."));

    let mut registry = SchemaRegistry::builtin();
    registry.register(EntitySchema::builtin_v1().with_version(2));
    let understanding = CountingService::replying(FULL_REPLY);
    let service = parse_service(cache_dir.path(), understanding.clone()).with_schemas(registry);

    let a = service.parse(&original, 1).await.unwrap();
    let copy = service.parse(&same_bytes, 1).await.unwrap();
    let b = service.parse(&edited, 1).await.unwrap();
    let a_v2 = service.parse(&original, 2).await.unwrap();

    // The file name is not part of the key
    assert_eq!(copy.meta.fingerprint, a.meta.fingerprint);
    assert_eq!(copy.meta.cache_status, CacheStatus::MemoryHit);

    assert_ne!(b.meta.fingerprint, a.meta.fingerprint);
    assert_ne!(a_v2.meta.fingerprint, a.meta.fingerprint);
    assert_eq!(a_v2.meta.cache_status, CacheStatus::Computed);
    assert_eq!(a_v2.bundle.schema_version, 2);
    assert_eq!(understanding.calls(), 3);
    assert_eq!(entry_count(cache_dir.path()), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_parses_call_the_service_once() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("Shared."));

    let understanding = CountingService::slow(FULL_REPLY, Duration::from_millis(100));
    let service = Arc::new(parse_service(cache_dir.path(), understanding.clone()));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let service = service.clone();
        let path = path.clone();
        handles.push(tokio::spawn(async move { service.parse(&path, 1).await }));
    }

    let mut computed = 0;
    let mut bundles = Vec::new();
    for handle in handles {
        let outcome = handle.await.unwrap().unwrap();
        if outcome.meta.cache_status == CacheStatus::Computed {
            computed += 1;
        }
        bundles.push(outcome.bundle);
    }

    assert_eq!(computed, 1);
    assert_eq!(understanding.calls(), 1);
    assert!(bundles.iter().all(|b| *b == bundles[0]));
}

#[tokio::test]
async fn unreachable_service_degrades_to_heuristics() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("No further details."));

    let understanding = CountingService::failing(ServiceError::Unavailable("connection refused".into()));
    let service = parse_service(cache_dir.path(), understanding.clone());

    let outcome = service.parse(&path, 1).await.unwrap();
    assert_eq!(outcome.meta.cache_status, CacheStatus::Computed);
    assert_eq!(outcome.bundle.stats.fallback_chunks, outcome.bundle.stats.chunks);
    assert_eq!(outcome.bundle.stats.ai_chunks, 0);
    assert!(outcome.completeness > 0.0 && outcome.completeness < 1.0);
    assert_eq!(understanding.calls(), 2);

    let device = &outcome.bundle.instances("DeviceContext")[0];
    assert_eq!(device.get("device_name"), Some(&FieldValue::Text("Acme Stent".into())));
    assert_eq!(device.fields["device_name"].provenance.strategy, Strategy::Heuristic);
}

#[tokio::test]
async fn nothing_usable_is_an_error_and_not_cached() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let body = paragraph("Lorem ipsum dolor sit amet, consectetur adipiscing elit.");
    let path = write(docs.path(), "blank.docx", &common::make_docx(&body));

    let understanding = CountingService::failing(ServiceError::Unavailable("down".into()));
    let service = parse_service(cache_dir.path(), understanding);

    let err = service.parse(&path, 1).await.unwrap_err();
    assert!(matches!(err, ParseError::AiServiceUnavailable(_)), "{err:?}");
    assert_eq!(entry_count(cache_dir.path()), 0);
    assert_eq!(service.cache().metrics().snapshot().failed_requests, 1);
}

#[tokio::test]
async fn corrupt_document_is_reported_and_not_cached() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "broken.pdf", b"%PDF-1.7\n1 0 obj\n<< /Type /Catalog");

    let understanding = CountingService::replying(FULL_REPLY);
    let service = parse_service(cache_dir.path(), understanding.clone());

    let err = service.parse(&path, 1).await.unwrap_err();
    assert!(matches!(err, ParseError::CorruptDocument { .. }), "{err:?}");
    assert_eq!(understanding.calls(), 0);
    assert_eq!(entry_count(cache_dir.path()), 0);
}

#[tokio::test]
async fn garbled_entry_is_recomputed_and_overwritten() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("Garbled later."));

    let first = parse_service(cache_dir.path(), CountingService::replying(FULL_REPLY))
        .parse(&path, 1)
        .await
        .unwrap();
    let entry_path = cache_dir
        .path()
        .join(format!("{}.entry", first.meta.fingerprint));
    std::fs::write(&entry_path, b"{\"fingerprint\": \"not json at all").unwrap();

    let understanding = CountingService::replying(FULL_REPLY);
    let service = parse_service(cache_dir.path(), understanding.clone());
    let second = service.parse(&path, 1).await.unwrap();
    assert_eq!(second.meta.cache_status, CacheStatus::Computed);
    assert_eq!(understanding.calls(), 1);
    assert_eq!(second.bundle, first.bundle);
    assert_eq!(service.cache().metrics().snapshot().corrupt_entries, 1);

    let third = parse_service(cache_dir.path(), CountingService::replying(FULL_REPLY))
        .parse(&path, 1)
        .await
        .unwrap();
    assert_eq!(third.meta.cache_status, CacheStatus::DiskHit);
}

#[tokio::test]
async fn unsupported_format_is_rejected_before_hashing() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "notes.txt", b"Device Name: Acme Stent");

    let service = parse_service(cache_dir.path(), CountingService::replying(FULL_REPLY));
    let err = service.parse(&path, 1).await.unwrap_err();
    assert!(matches!(err, ParseError::UnsupportedFormat(ref f) if f == "txt"), "{err:?}");
}

#[tokio::test]
async fn unknown_schema_version_is_rejected() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let path = write(docs.path(), "report.docx", &report_docx("Schema check."));

    let understanding = CountingService::replying(FULL_REPLY);
    let service = parse_service(cache_dir.path(), understanding.clone());
    let err = service.parse(&path, 9).await.unwrap_err();
    assert!(matches!(err, ParseError::UnknownSchemaVersion(9)), "{err:?}");
    assert_eq!(understanding.calls(), 0);
}

#[tokio::test]
async fn missing_file_is_an_io_error() {
    let cache_dir = tempfile::tempdir().unwrap();
    let service = parse_service(cache_dir.path(), CountingService::replying(FULL_REPLY));
    let err = service
        .parse(&cache_dir.path().join("absent.pdf"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, ParseError::Io { .. }), "{err:?}");
}

#[tokio::test]
async fn empty_answer_is_an_error_and_not_cached() {
    let docs = tempfile::tempdir().unwrap();
    let cache_dir = tempfile::tempdir().unwrap();
    let body = paragraph("Lorem ipsum dolor sit amet, consectetur adipiscing elit.");
    let path = write(docs.path(), "blank.docx", &common::make_docx(&body));

    let understanding = CountingService::replying(r#"{"entities": {}}"#);
    let service = parse_service(cache_dir.path(), understanding.clone());

    let err = service.parse(&path, 1).await.unwrap_err();
    assert!(matches!(err, ParseError::NoEntities), "{err:?}");
    assert_eq!(understanding.calls(), 1);
    assert_eq!(entry_count(cache_dir.path()), 0);
}
