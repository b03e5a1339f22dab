use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use doc_harness::bulk::index_all;
use doc_harness::cache::CacheStore;
use doc_harness::changes::ChangeDetector;
use doc_harness::embedding::EmbeddingProvider;
use doc_harness::error::{IngestError, Result};
use doc_harness::ingest::{CancelFlag, Ingestor};
use doc_harness::layout::{SourceLayout, Version};
use doc_harness::ledger::ProgressStore;
use doc_harness::models::{ChunkRecord, IngestMode, SearchHit};
use doc_harness::normalize::PassthroughNormalizer;
use doc_harness::retry::RetryPolicy;
use doc_harness::store::memory::InMemoryStore;
use doc_harness::store::IndexStore;
use doc_harness::update::check_and_apply;

// ============ Fakes ============

/// Deterministic embedder that rejects any text containing `poison`.
struct FakeEmbedder {
    poison: Option<&'static str>,
    calls: AtomicUsize,
}

impl FakeEmbedder {
    fn new() -> Self {
        Self {
            poison: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn poisoned_by(marker: &'static str) -> Self {
        Self {
            poison: Some(marker),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake"
    }
    fn dims(&self) -> usize {
        3
    }
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = self.poison {
            if text.contains(marker) {
                return Err(IngestError::Embedding {
                    message: "rejected input".to_string(),
                    transient: false,
                });
            }
        }
        Ok(vec![
            text.len() as f32,
            text.matches('e').count() as f32,
            1.0,
        ])
    }
}

/// Fails the first `failures` embed calls with the given transience.
struct FlakyEmbedder {
    failures: usize,
    transient: bool,
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn model_name(&self) -> &str {
        "flaky"
    }
    fn dims(&self) -> usize {
        1
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(IngestError::Embedding {
                message: format!("attempt {} refused", n + 1),
                transient: self.transient,
            });
        }
        Ok(vec![1.0])
    }
}

/// Wraps the in-memory store and times out the first `failures` inserts.
struct FlakyStore {
    inner: InMemoryStore,
    failures: usize,
    inserts: AtomicUsize,
}

#[async_trait]
impl IndexStore for FlakyStore {
    async fn insert(&self, record: &ChunkRecord) -> Result<()> {
        let n = self.inserts.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(IngestError::Store {
                message: "pool timed out".to_string(),
                transient: true,
            });
        }
        self.inner.insert(record).await
    }
    async fn delete_where(&self, filename: &str, version_str: &str) -> Result<u64> {
        self.inner.delete_where(filename, version_str).await
    }
    async fn search(
        &self,
        query_vec: &[f32],
        version: i64,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.inner.search(query_vec, version, limit).await
    }
    async fn records_for(&self, filename: &str, version_str: &str) -> Result<Vec<ChunkRecord>> {
        self.inner.records_for(filename, version_str).await
    }
    async fn count_by_version(&self) -> Result<Vec<(i64, u64)>> {
        self.inner.count_by_version().await
    }
}

/// Turns the cache's directory into a plain file, then rejects the input, so
/// the batch fails and the cache can no longer be rewritten.
struct CacheBreakingEmbedder {
    cache_dir: PathBuf,
}

#[async_trait]
impl EmbeddingProvider for CacheBreakingEmbedder {
    fn model_name(&self) -> &str {
        "cache-breaking"
    }
    fn dims(&self) -> usize {
        1
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        fs::remove_dir_all(&self.cache_dir).unwrap();
        fs::write(&self.cache_dir, "not a directory").unwrap();
        Err(IngestError::Embedding {
            message: "rejected input".to_string(),
            transient: false,
        })
    }
}

// ============ Fixtures ============

struct Sandbox {
    _tmp: TempDir,
    root: PathBuf,
    layout: SourceLayout,
    cache: CacheStore,
}

impl Sandbox {
    fn new() -> Self {
        Self::nested("")
    }

    /// Sandbox rooted at `<tmp>/<parent>`.
    fn nested(parent: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let root = match parent {
            "" => tmp.path().to_path_buf(),
            parent => tmp.path().join(parent),
        };
        let layout = SourceLayout::new(
            root.join("raw"),
            root.join("markdown"),
            vec![v17()],
            "rst",
        )
        .unwrap();
        let cache = CacheStore::new(root.join(".file_cache.json"));
        Self {
            _tmp: tmp,
            root,
            layout,
            cache,
        }
    }

    /// Write a raw source file under the 17.0 content tree.
    fn write_raw(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.layout.raw_content_dir(&v17()).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    /// Write a normalized document under the 17.0 markdown tree.
    fn write_normalized(&self, rel: &str, text: &str) -> PathBuf {
        let path = self.layout.normalized_content_dir(&v17()).join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }
}

fn v17() -> Version {
    Version::parse("17.0").unwrap()
}

fn no_delay(attempts: u32) -> RetryPolicy {
    RetryPolicy::new(attempts, Duration::ZERO)
}

fn ingestor<'a>(
    sandbox: &'a Sandbox,
    embedder: &'a dyn EmbeddingProvider,
    store: &'a dyn IndexStore,
) -> Ingestor<'a> {
    Ingestor::new(&sandbox.layout, &PassthroughNormalizer, embedder, store)
        .with_retry(no_delay(3))
        .with_base_url("https://docs.example.com")
}

fn key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

// ============ Change detection and cache ============

#[tokio::test]
async fn test_bootstrap_records_baseline_without_indexing() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let b = sandbox.write_raw("sales/b.rst", "# B\n\nbeta");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();

    let report = check_and_apply(
        &ingestor(&sandbox, &embedder, &store),
        &sandbox.cache,
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    assert!(report.bootstrap);
    assert_eq!((report.added, report.modified, report.removed), (0, 0, 0));
    assert!(store.is_empty());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);

    let snapshot = sandbox.cache.read().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.contains(&key(&a)));
    assert!(snapshot.contains(&key(&b)));
}

#[tokio::test]
async fn test_second_detection_without_edits_is_empty() {
    let sandbox = Sandbox::new();
    sandbox.write_raw("a.rst", "# A\n\nalpha");
    let detector = ChangeDetector::new(&sandbox.layout).unwrap();

    let first = detector.detect(&Default::default()).unwrap();
    let second = detector.detect(&first.current).unwrap();
    assert!(!second.bootstrap);
    assert!(second.changes.is_empty());
    assert_eq!(second.unchanged, 1);

    let third = detector.detect(&second.current).unwrap();
    assert!(third.changes.is_empty());
}

#[tokio::test]
async fn test_update_indexes_modified_and_added_files() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);
    let cancel = CancelFlag::new();

    check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();

    sandbox.write_raw("a.rst", "# A\n\nalpha, revised");
    sandbox.write_raw("b.rst", "# B\n\nbeta");
    let report = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();

    assert!(!report.bootstrap);
    assert_eq!((report.added, report.modified, report.removed), (1, 1, 0));
    assert_eq!(report.batch.files_indexed, 2);

    let records = store.records_for("content/a.md", "17.0").await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].content.contains("alpha, revised"));
    assert_eq!(records[0].url, "https://docs.example.com/17.0/a.html#a");
    assert!(sandbox
        .layout
        .normalized_content_dir(&v17())
        .join("b.md")
        .exists());

    let snapshot = sandbox.cache.read().unwrap();
    assert_eq!(snapshot.len(), 2);
    assert!(snapshot.contains(&key(&a)));
}

#[tokio::test]
async fn test_removed_file_loses_its_records() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    sandbox.write_raw("b.rst", "# B\n\nbeta");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);
    let cancel = CancelFlag::new();

    check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    sandbox.write_raw("a.rst", "# A\n\nalpha again");
    check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    assert_eq!(store.len(), 1);

    fs::remove_file(&a).unwrap();
    let report = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();

    assert_eq!(report.removed, 1);
    assert_eq!(report.batch.records_deleted, 1);
    assert!(store.is_empty());
    assert!(!sandbox.cache.read().unwrap().contains(&key(&a)));
    assert!(!sandbox
        .layout
        .normalized_content_dir(&v17())
        .join("a.md")
        .exists());
}

#[tokio::test]
async fn test_failed_batch_restores_prior_snapshot() {
    let sandbox = Sandbox::new();
    sandbox.write_raw("1.rst", "# One\n\nfirst");
    let second = sandbox.write_raw("2.rst", "# Two\n\nsecond");
    sandbox.write_raw("3.rst", "# Three\n\nthird");
    let embedder = FakeEmbedder::poisoned_by("POISON");
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);
    let cancel = CancelFlag::new();

    check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    let prior = sandbox.cache.read().unwrap();
    let prior_bytes = fs::read(sandbox.cache.path()).unwrap();

    sandbox.write_raw("1.rst", "# One\n\nfirst, edited");
    sandbox.write_raw("2.rst", "# Two\n\nPOISON");
    sandbox.write_raw("3.rst", "# Three\n\nthird, edited");

    let err = check_and_apply(&ingestor, &sandbox.cache, &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::BatchFailed { .. }), "{err}");
    assert_eq!(err.failing_path(), Some(second.as_path()));
    assert_eq!(sandbox.cache.read().unwrap(), prior);
    assert_eq!(fs::read(sandbox.cache.path()).unwrap(), prior_bytes);

    // File 1 was indexed before the failure and stays indexed; file 3 was
    // never reached.
    assert_eq!(store.records_for("content/1.md", "17.0").await.unwrap().len(), 1);
    assert!(store.records_for("content/3.md", "17.0").await.unwrap().is_empty());

    // The next run sees all three edits again.
    sandbox.write_raw("2.rst", "# Two\n\nsecond, fixed");
    let report = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    assert_eq!(report.modified, 3);
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_cancel_before_batch_rolls_back() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);

    check_and_apply(&ingestor, &sandbox.cache, &CancelFlag::new())
        .await
        .unwrap();
    let prior = sandbox.cache.read().unwrap();
    sandbox.write_raw("a.rst", "# A\n\nalpha, edited");

    let cancel = CancelFlag::new();
    cancel.cancel();
    let err = check_and_apply(&ingestor, &sandbox.cache, &cancel)
        .await
        .unwrap_err();

    assert_eq!(err.failing_path(), Some(a.as_path()));
    assert_eq!(sandbox.cache.read().unwrap(), prior);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_corrupt_cache_is_an_error() {
    let sandbox = Sandbox::new();
    sandbox.write_raw("a.rst", "# A\n\nalpha");
    fs::write(sandbox.cache.path(), "{ truncated").unwrap();
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();

    let err = check_and_apply(
        &ingestor(&sandbox, &embedder, &store),
        &sandbox.cache,
        &CancelFlag::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::Json { .. }));
    assert_eq!(fs::read_to_string(sandbox.cache.path()).unwrap(), "{ truncated");
}

#[tokio::test]
async fn test_rollback_write_failure_is_fatal() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let cache_dir = sandbox.root.join("state");
    let cache = CacheStore::new(cache_dir.join(".file_cache.json"));
    let store = InMemoryStore::new();

    let embedder = FakeEmbedder::new();
    check_and_apply(
        &ingestor(&sandbox, &embedder, &store),
        &cache,
        &CancelFlag::new(),
    )
    .await
    .unwrap();
    sandbox.write_raw("a.rst", "# A\n\nalpha, edited");

    let breaking = CacheBreakingEmbedder {
        cache_dir: cache_dir.clone(),
    };
    let err = check_and_apply(
        &ingestor(&sandbox, &breaking, &store),
        &cache,
        &CancelFlag::new(),
    )
    .await
    .unwrap_err();

    match &err {
        IngestError::RollbackFailed {
            path,
            cause,
            source,
        } => {
            assert_eq!(path, &a);
            assert!(matches!(**cause, IngestError::Embedding { .. }), "{cause}");
            assert!(matches!(**source, IngestError::Io { .. }), "{source}");
        }
        other => panic!("expected RollbackFailed, got {other}"),
    }
    assert_eq!(err.failing_path(), Some(a.as_path()));
    assert!(!err.is_transient());
    assert!(cache_dir.is_file());
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_versions_folder_above_sources_is_ignored() {
    let sandbox = Sandbox::nested("versions/project");
    let a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);
    let cancel = CancelFlag::new();

    check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    sandbox.write_raw("a.rst", "# A\n\nalpha, edited");
    let report = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();

    assert_eq!(report.modified, 1);
    let records = store.records_for("content/a.md", "17.0").await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].version, 170);
    assert!(sandbox.cache.read().unwrap().contains(&key(&a)));
}

#[tokio::test]
async fn test_relocated_source_tree_recovers() {
    let sandbox = Sandbox::new();
    let old_a = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let cancel = CancelFlag::new();

    check_and_apply(
        &ingestor(&sandbox, &embedder, &store),
        &sandbox.cache,
        &cancel,
    )
    .await
    .unwrap();

    fs::rename(sandbox.root.join("raw"), sandbox.root.join("moved_raw")).unwrap();
    let moved = SourceLayout::new(
        sandbox.root.join("moved_raw"),
        sandbox.root.join("markdown"),
        vec![v17()],
        "rst",
    )
    .unwrap();
    let new_a = moved.raw_content_dir(&v17()).join("a.rst");
    let ingestor = Ingestor::new(&moved, &PassthroughNormalizer, &embedder, &store)
        .with_retry(no_delay(3))
        .with_base_url("https://docs.example.com");

    let report = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    assert_eq!((report.added, report.removed), (1, 1));
    assert_eq!(report.batch.records_deleted, 0);
    assert_eq!(store.records_for("content/a.md", "17.0").await.unwrap().len(), 1);

    let snapshot = sandbox.cache.read().unwrap();
    assert!(snapshot.contains(&key(&new_a)));
    assert!(!snapshot.contains(&key(&old_a)));

    let again = check_and_apply(&ingestor, &sandbox.cache, &cancel).await.unwrap();
    assert_eq!((again.added, again.modified, again.removed), (0, 0, 0));
    assert_eq!(again.unchanged, 1);
}

// ============ Upsert and retry ============

#[tokio::test]
async fn test_upsert_leaves_only_second_pass_chunks() {
    let sandbox = Sandbox::new();
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store).with_chunking(
        doc_harness::chunk::ChunkSettings {
            max_chars: 60,
            overlap_chars: 10,
        },
    );

    let first: String = (0..20).map(|i| format!("old{} ", i)).collect();
    let raw = sandbox.write_raw("guide.rst", &format!("# Guide\n\n{}", first));
    let written = ingestor.ingest_source(&raw, IngestMode::Upsert).await.unwrap();
    assert!(written > 1);

    sandbox.write_raw("guide.rst", "# Guide\n\nnew text");
    ingestor.ingest_source(&raw, IngestMode::Upsert).await.unwrap();

    let records = store.records_for("content/guide.md", "17.0").await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records.iter().all(|r| !r.content.contains("old")));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_transient_embedding_failures_are_retried() {
    let sandbox = Sandbox::new();
    let raw = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FlakyEmbedder {
        failures: 2,
        transient: true,
        calls: AtomicUsize::new(0),
    };
    let store = InMemoryStore::new();

    let written = ingestor(&sandbox, &embedder, &store)
        .ingest_source(&raw, IngestMode::Upsert)
        .await
        .unwrap();
    assert_eq!(written, 1);
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_budget_is_bounded() {
    let sandbox = Sandbox::new();
    let raw = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FlakyEmbedder {
        failures: 10,
        transient: true,
        calls: AtomicUsize::new(0),
    };
    let store = InMemoryStore::new();

    let err = ingestor(&sandbox, &embedder, &store)
        .ingest_source(&raw, IngestMode::Upsert)
        .await
        .unwrap_err();
    assert!(err.is_transient());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_deterministic_failures_are_not_retried() {
    let sandbox = Sandbox::new();
    let raw = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FlakyEmbedder {
        failures: 1,
        transient: false,
        calls: AtomicUsize::new(0),
    };
    let store = InMemoryStore::new();

    let err = ingestor(&sandbox, &embedder, &store)
        .ingest_source(&raw, IngestMode::Upsert)
        .await
        .unwrap_err();
    assert!(!err.is_transient());
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_store_failures_are_retried() {
    let sandbox = Sandbox::new();
    let raw = sandbox.write_raw("a.rst", "# A\n\nalpha");
    let embedder = FakeEmbedder::new();
    let store = FlakyStore {
        inner: InMemoryStore::new(),
        failures: 2,
        inserts: AtomicUsize::new(0),
    };

    ingestor(&sandbox, &embedder, &store)
        .ingest_source(&raw, IngestMode::Upsert)
        .await
        .unwrap();
    assert_eq!(store.inserts.load(Ordering::SeqCst), 3);
    assert_eq!(store.inner.len(), 1);
}

// ============ Bulk mode ============

#[tokio::test]
async fn test_bulk_run_skips_files_in_ledger() {
    let sandbox = Sandbox::new();
    let x = sandbox.write_normalized("x.md", "# X\n\nalready done");
    sandbox.write_normalized("y.md", "# Y\n\nstill pending");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();

    let mut progress = ProgressStore::open(sandbox.root.join("processing_progress.json"));
    progress.mark_done("17.0", &key(&x));

    let report = index_all(
        &ingestor(&sandbox, &embedder, &store),
        &mut progress,
        &CancelFlag::new(),
    )
    .await
    .unwrap();

    assert_eq!(report.processed, 1);
    assert_eq!(report.skipped, 1);
    assert!(store.records_for("content/x.md", "17.0").await.unwrap().is_empty());
    assert_eq!(store.records_for("content/y.md", "17.0").await.unwrap().len(), 1);

    let reopened = ProgressStore::open(sandbox.root.join("processing_progress.json"));
    assert_eq!(reopened.ledger().counts(), vec![("17.0".to_string(), 2)]);
}

#[tokio::test]
async fn test_bulk_failure_keeps_earlier_progress() {
    let sandbox = Sandbox::new();
    let a = sandbox.write_normalized("a.md", "# A\n\nfine");
    let b = sandbox.write_normalized("b.md", "# B\n\nPOISON");
    let embedder = FakeEmbedder::poisoned_by("POISON");
    let store = InMemoryStore::new();
    let ledger_path = sandbox.root.join("processing_progress.json");

    let mut progress = ProgressStore::open(&ledger_path);
    let err = index_all(
        &ingestor(&sandbox, &embedder, &store),
        &mut progress,
        &CancelFlag::new(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, IngestError::Embedding { .. }));

    let reopened = ProgressStore::open(&ledger_path);
    assert!(reopened.is_done("17.0", &key(&a)));
    assert!(!reopened.is_done("17.0", &key(&b)));
}

#[tokio::test]
async fn test_bulk_insert_is_idempotent_on_rerun() {
    let sandbox = Sandbox::new();
    sandbox.write_normalized("a.md", "# A\n\nfine");
    let embedder = FakeEmbedder::new();
    let store = InMemoryStore::new();
    let ingestor = ingestor(&sandbox, &embedder, &store);

    // Two fresh ledgers, so the file is indexed twice in insert mode.
    for name in ["first.json", "second.json"] {
        let mut progress = ProgressStore::open(sandbox.root.join(name));
        index_all(&ingestor, &mut progress, &CancelFlag::new())
            .await
            .unwrap();
    }
    assert_eq!(store.len(), 1);
}
