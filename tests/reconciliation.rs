//! Integration tests for reconciliation against a real (in-memory) store:
//! batching, union correctness, and batch failures feeding the backfill.
//!
//! Each test creates its own in-memory SQLite database for isolation.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use press_ingest::config::Config;
use press_ingest::feed::FetchError;
use press_ingest::storage::{ArticleRecord, Database, RecordOrigin, StoreError};
use press_ingest::sync::{
    ArticleFetcher, ExistenceChecker, LinkLookup, Pipeline, ReconciliationReport, Reconciler,
    RetryPolicy, TracingProgress, UpsertEngine,
};

async fn test_db() -> Database {
    Database::open(":memory:").await.unwrap()
}

fn record(guid: &str, link: &str) -> ArticleRecord {
    ArticleRecord {
        guid: guid.to_string(),
        link: link.to_string(),
        title: format!("Title {guid}"),
        pub_date: Some(1_700_000_000),
        description: None,
        content: None,
        comments_link: None,
        creator: None,
        categories: vec!["要闻".to_string()],
        origin: RecordOrigin::Feed,
    }
}

fn links(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("https://x.com/{i}")).collect()
}

/// Wraps the store, recording batch sizes and failing every attempt at the
/// batch whose first link is `poisoned`.
struct FlakyStore<'a> {
    db: &'a Database,
    poisoned: Option<String>,
    batch_sizes: Mutex<Vec<usize>>,
}

impl<'a> FlakyStore<'a> {
    fn new(db: &'a Database, poisoned: Option<String>) -> Self {
        Self {
            db,
            poisoned,
            batch_sizes: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl LinkLookup for FlakyStore<'_> {
    async fn find_existing_links(&self, links: &[String]) -> Result<HashSet<String>, StoreError> {
        self.batch_sizes.lock().unwrap().push(links.len());
        if self.poisoned.is_some() && links.first() == self.poisoned.as_ref() {
            return Err(StoreError::Query(sqlx::Error::PoolTimedOut));
        }
        self.db.find_existing_links(links).await
    }
}

/// Serves a minimal record for any URL and remembers what was asked for.
#[derive(Default)]
struct EchoFetcher {
    fetched: Mutex<Vec<String>>,
}

#[async_trait]
impl ArticleFetcher for EchoFetcher {
    async fn fetch_article(&self, url: &str) -> Result<ArticleRecord, FetchError> {
        self.fetched.lock().unwrap().push(url.to_string());
        let mut r = record(url, url);
        r.origin = RecordOrigin::Backfill;
        Ok(r)
    }
}

fn test_config() -> Config {
    Config {
        database_path: ":memory:".to_string(),
        retry_times: 3,
        retry_base_delay_ms: 0,
        request_delay_ms: 0,
        batch_size: 1000,
        ..Config::default()
    }
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn test_empty_store_2500_links_three_batches() {
    let db = test_db().await;
    let store = FlakyStore::new(&db, None);
    let reconciler = Reconciler::new(ExistenceChecker::new(1000, RetryPolicy::none()).unwrap());

    let result = reconciler
        .reconcile(&store, &[], &links(2500), &TracingProgress)
        .await;

    assert_eq!(*store.batch_sizes.lock().unwrap(), vec![1000, 1000, 500]);
    assert_eq!(result.check.batches, 3);
    assert!(result.check.existing.is_empty());
    assert_eq!(result.missing().len(), 2500);
}

#[tokio::test]
async fn test_batch_size_bound_with_partial_store() {
    let db = test_db().await;
    let all = links(250);
    for (i, link) in all.iter().enumerate().step_by(3) {
        db.upsert_article(&record(&format!("g{i}"), link), &[])
            .await
            .unwrap();
    }
    let store = FlakyStore::new(&db, None);
    let reconciler = Reconciler::new(ExistenceChecker::new(64, RetryPolicy::none()).unwrap());

    let result = reconciler
        .reconcile(&store, &all[..100], &all[50..], &TracingProgress)
        .await;

    assert!(store.batch_sizes.lock().unwrap().iter().all(|&n| n <= 64));
    assert_eq!(result.candidates, 250);
    assert_eq!(result.check.existing.len(), 84);
    assert_eq!(result.missing().len(), 166);
    let missing: HashSet<&String> = result.missing().iter().collect();
    assert!(result.check.existing.iter().all(|l| !missing.contains(l)));
}

// ============================================================================
// Union correctness
// ============================================================================

#[tokio::test]
async fn test_union_against_store() {
    let db = test_db().await;
    db.upsert_article(&record("gb", "https://x.com/b"), &[])
        .await
        .unwrap();
    let reconciler = Reconciler::new(ExistenceChecker::new(1000, RetryPolicy::none()).unwrap());

    let result = reconciler
        .reconcile(
            &db,
            &["https://x.com/a".to_string(), "https://x.com/b".to_string()],
            &["https://x.com/b/".to_string(), "https://x.com/c".to_string()],
            &TracingProgress,
        )
        .await;

    assert_eq!(
        result.missing(),
        &["https://x.com/a".to_string(), "https://x.com/c".to_string()][..]
    );
}

// ============================================================================
// Batch failure
// ============================================================================

#[tokio::test]
async fn test_failed_batch_is_backfilled_and_run_completes() {
    let db = test_db().await;
    let all = links(2500);
    // Everything in the middle batch is already stored
    for (i, link) in all[1000..2000].iter().enumerate() {
        db.upsert_article(&record(&format!("g{i}"), link), &["要闻".to_string()])
            .await
            .unwrap();
    }
    let store = FlakyStore::new(&db, Some(all[1000].clone()));
    let fetcher = EchoFetcher::default();
    let pipeline = Pipeline::new(&test_config()).unwrap();
    let mut report = ReconciliationReport::default();

    pipeline
        .reconcile_and_backfill(&db, &store, &fetcher, &[], &all, &mut report, &TracingProgress)
        .await;

    assert_eq!(report.batches, 3);
    assert_eq!(report.failed_batches.len(), 1);
    assert_eq!(report.failed_batches[0].index, 1);
    // The failing batch counts as missing, so all 2500 are backfilled
    assert_eq!(report.existing, 0);
    assert_eq!(report.missing, 2500);
    assert_eq!(report.backfilled, 2500);
    assert!(report.failed_urls.is_empty());
    assert_eq!(fetcher.fetched.lock().unwrap().len(), 2500);

    // 1 + 4 attempts + 1
    assert_eq!(store.batch_sizes.lock().unwrap().len(), 6);
    // Re-fetching stored links did not duplicate them
    assert_eq!(db.article_count().await.unwrap(), 2500);
    assert_eq!(db.article_category_count().await.unwrap(), 2500);
}

#[tokio::test]
async fn test_custom_allow_list_filters_categories() {
    let db = test_db().await;
    let engine = UpsertEngine::new(["国际"]);
    let mut r = record("g1", "https://x.com/a");
    r.categories = vec!["要闻".to_string(), "国际".to_string()];

    let outcome = engine.upsert(&db, &r).await.unwrap();
    assert_eq!(
        db.categories_for_article(outcome.article_id).await.unwrap(),
        vec!["国际".to_string()]
    );
}
