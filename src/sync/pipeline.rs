use std::time::Duration;

use super::backfill::{ArticleFetcher, Backfiller};
use super::checker::{ExistenceChecker, LinkLookup};
use super::reconciler::Reconciler;
use super::report::{FailureStage, ProgressSink, ReconciliationReport};
use super::upsert::UpsertEngine;
use crate::config::{Config, ConfigError};
use crate::feed::HttpFetcher;
use crate::storage::{ArticleRecord, Database};

/// Categories listed in the end-of-run summary.
const TOP_CATEGORIES: usize = 10;

/// One full ingestion run: feed pages, sitemap, reconciliation, backfill.
#[derive(Debug, Clone)]
pub struct Pipeline {
    feed_url: String,
    sitemap_url: String,
    max_feed_pages: u32,
    page_delay: Duration,
    skip_backfill: bool,
    reconciler: Reconciler,
    engine: UpsertEngine,
    backfiller: Backfiller,
}

impl Pipeline {
    /// Build from a configuration. Fails before any I/O on invalid settings.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let checker = ExistenceChecker::new(config.batch_size, config.retry_policy())?;
        Ok(Self {
            feed_url: config.feed_url.clone(),
            sitemap_url: config.sitemap_url.clone(),
            max_feed_pages: config.max_feed_pages,
            page_delay: config.request_delay(),
            skip_backfill: false,
            reconciler: Reconciler::new(checker),
            engine: UpsertEngine::from_config(config),
            backfiller: Backfiller::new(config.request_delay(), config.backfill_limit()),
        })
    }

    /// Reconcile only; every missing link is reported as deferred.
    pub fn skip_backfill(mut self, skip: bool) -> Self {
        self.skip_backfill = skip;
        self
    }

    /// Run every stage against the live site and return the accounting.
    ///
    /// An unreachable feed or sitemap is recorded as a failed URL and the run
    /// goes on with whatever the other source produced.
    pub async fn run(&self, db: &Database, http: &HttpFetcher, sink: &dyn ProgressSink) -> ReconciliationReport {
        let mut report = ReconciliationReport::default();

        let records = match http
            .fetch_feed_pages(&self.feed_url, self.max_feed_pages, self.page_delay)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                tracing::error!(url = %self.feed_url, error = %e, "Feed unavailable, continuing with sitemap only");
                sink.url_failed(report.record_failure(self.feed_url.as_str(), FailureStage::Fetch, &e));
                Vec::new()
            }
        };
        let feed_links = self.ingest_feed(db, &records, &mut report, sink).await;

        let sitemap_urls = match http.fetch_sitemap(&self.sitemap_url, self.page_delay).await {
            Ok(urls) => urls,
            Err(e) => {
                tracing::error!(url = %self.sitemap_url, error = %e, "Sitemap unavailable, reconciling feed only");
                sink.url_failed(report.record_failure(self.sitemap_url.as_str(), FailureStage::Fetch, &e));
                Vec::new()
            }
        };
        report.sitemap_urls = sitemap_urls.len();

        self.reconcile_and_backfill(db, db, http, &feed_links, &sitemap_urls, &mut report, sink)
            .await;
        self.finish(db, &mut report, sink).await;
        report
    }

    /// Persist feed records; returns every feed link for reconciliation.
    ///
    /// Links whose upsert failed are returned too, so the backfill gets a
    /// second chance at them.
    pub async fn ingest_feed(
        &self,
        db: &Database,
        records: &[ArticleRecord],
        report: &mut ReconciliationReport,
        sink: &dyn ProgressSink,
    ) -> Vec<String> {
        report.feed_records += records.len();
        let mut links = Vec::with_capacity(records.len());

        for record in records {
            links.push(record.link.clone());
            match self.engine.upsert(db, record).await {
                Ok(_) => report.feed_ingested += 1,
                Err(e) => {
                    report.feed_failed += 1;
                    sink.url_failed(report.record_failure(record.link.as_str(), FailureStage::Persist, &e));
                }
            }
        }

        tracing::info!(
            records = report.feed_records,
            ingested = report.feed_ingested,
            failed = report.feed_failed,
            "Feed ingested"
        );
        links
    }

    /// Reconcile the two link supplies against `lookup` and backfill what is
    /// missing into `db`.
    #[allow(clippy::too_many_arguments)]
    pub async fn reconcile_and_backfill<L, F>(
        &self,
        db: &Database,
        lookup: &L,
        fetcher: &F,
        feed_links: &[String],
        sitemap_urls: &[String],
        report: &mut ReconciliationReport,
        sink: &dyn ProgressSink,
    ) where
        L: LinkLookup + ?Sized,
        F: ArticleFetcher + ?Sized,
    {
        let reconciliation = self
            .reconciler
            .reconcile(lookup, feed_links, sitemap_urls, sink)
            .await;

        report.total_candidates = reconciliation.candidates;
        report.batches = reconciliation.check.batches;
        report.existing = reconciliation.check.existing.len();
        report.missing = reconciliation.check.missing.len();
        report
            .failed_batches
            .extend(reconciliation.check.failed_batches.iter().cloned());

        tracing::info!(
            candidates = report.total_candidates,
            existing = report.existing,
            missing = report.missing,
            "Reconciliation complete"
        );

        if self.skip_backfill {
            report.deferred += report.missing;
            return;
        }

        self.backfiller
            .run(db, &self.engine, fetcher, reconciliation.missing(), report, sink)
            .await;
    }

    /// Fill in store totals, log the category summary, and notify the sink.
    pub async fn finish(&self, db: &Database, report: &mut ReconciliationReport, sink: &dyn ProgressSink) {
        match db.article_count().await {
            Ok(count) => report.article_count = count,
            Err(e) => tracing::warn!(error = %e, "Failed to count articles"),
        }

        match db.category_stats().await {
            Ok(stats) => {
                for stat in stats.iter().take(TOP_CATEGORIES) {
                    tracing::info!(category = %stat.name, articles = stat.article_count, "Category");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to load category stats"),
        }

        sink.finished(report);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_zero_batch_size() {
        let config = Config {
            batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(Pipeline::new(&config), Err(ConfigError::Invalid(_))));
    }

    fn feed_record(guid: &str, categories: &[&str]) -> ArticleRecord {
        ArticleRecord {
            guid: guid.to_string(),
            link: format!("https://x.com/{guid}"),
            title: format!("Post {guid}"),
            pub_date: None,
            description: None,
            content: None,
            comments_link: None,
            creator: None,
            categories: categories.iter().map(|c| c.to_string()).collect(),
            origin: crate::storage::RecordOrigin::Feed,
        }
    }

    #[tokio::test]
    async fn test_ingest_feed_persist_failure_does_not_block_later_records() {
        let db = Database::open(":memory:").await.unwrap();
        sqlx::query("DROP TABLE article_categories")
            .execute(&db.pool)
            .await
            .unwrap();
        let pipeline = Pipeline::new(&Config::default()).unwrap();
        let records = vec![
            feed_record("a", &[]),
            feed_record("b", &["要闻"]),
            feed_record("c", &[]),
        ];
        let mut report = ReconciliationReport::default();

        let links = pipeline
            .ingest_feed(&db, &records, &mut report, &crate::sync::TracingProgress)
            .await;

        assert_eq!(report.feed_records, 3);
        assert_eq!(report.feed_ingested, 2);
        assert_eq!(report.feed_failed, 1);
        assert_eq!(report.failed_urls.len(), 1);
        assert_eq!(report.failed_urls[0].url, "https://x.com/b");
        assert_eq!(report.failed_urls[0].stage, FailureStage::Persist);
        assert_eq!(db.article_count().await.unwrap(), 2);
        // The failed link still goes on to reconciliation
        assert_eq!(links.len(), 3);
        assert!(links.contains(&"https://x.com/b".to_string()));
    }

    #[tokio::test]
    async fn test_skip_backfill_defers_everything() {
        let db = Database::open(":memory:").await.unwrap();
        let config = Config {
            retry_times: 0,
            ..Config::default()
        };
        let pipeline = Pipeline::new(&config).unwrap().skip_backfill(true);
        let http = HttpFetcher::new(&config).unwrap();
        let mut report = ReconciliationReport::default();

        pipeline
            .reconcile_and_backfill(
                &db,
                &db,
                &http,
                &[],
                &["https://x.com/a".to_string(), "https://x.com/b".to_string()],
                &mut report,
                &crate::sync::TracingProgress,
            )
            .await;

        assert_eq!(report.missing, 2);
        assert_eq!(report.deferred, 2);
        assert_eq!(report.backfilled, 0);
    }
}
