use std::time::Duration;

use async_trait::async_trait;

use super::report::{FailureStage, ProgressSink, ReconciliationReport};
use super::upsert::UpsertEngine;
use crate::feed::FetchError;
use crate::storage::{ArticleRecord, Database};

/// Turns one article URL into a validated record.
#[async_trait]
pub trait ArticleFetcher: Send + Sync {
    async fn fetch_article(&self, url: &str) -> Result<ArticleRecord, FetchError>;
}

/// Fetches missing links one at a time and hands them to the upsert engine.
#[derive(Debug, Clone)]
pub struct Backfiller {
    delay: Duration,
    limit: Option<usize>,
}

impl Backfiller {
    /// `delay` is slept between consecutive fetches. `limit` caps how many
    /// links are attempted; the remainder is counted as deferred.
    pub fn new(delay: Duration, limit: Option<usize>) -> Self {
        Self { delay, limit }
    }

    /// Process `missing` in order. Per-URL failures are recorded in `report`
    /// and never stop the loop.
    pub async fn run<F>(
        &self,
        db: &Database,
        engine: &UpsertEngine,
        fetcher: &F,
        missing: &[String],
        report: &mut ReconciliationReport,
        sink: &dyn ProgressSink,
    ) where
        F: ArticleFetcher + ?Sized,
    {
        let take = self.limit.map_or(missing.len(), |n| n.min(missing.len()));
        let (batch, deferred) = missing.split_at(take);
        report.deferred += deferred.len();
        if !deferred.is_empty() {
            tracing::info!(
                attempting = batch.len(),
                deferred = deferred.len(),
                "Backfill limit reached, deferring remaining links"
            );
        }

        for (i, url) in batch.iter().enumerate() {
            if i > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            tracing::debug!(url = %url, n = i + 1, of = batch.len(), "Backfilling");
            let record = match fetcher.fetch_article(url).await {
                Ok(record) => record,
                Err(e) => {
                    let stage = match e {
                        FetchError::Parse(_) => FailureStage::Parse,
                        _ => FailureStage::Fetch,
                    };
                    sink.url_failed(report.record_failure(url.as_str(), stage, &e));
                    continue;
                }
            };

            match engine.upsert(db, &record).await {
                Ok(_) => report.backfilled += 1,
                Err(e) => sink.url_failed(report.record_failure(url.as_str(), FailureStage::Persist, &e)),
            }
        }
    }
}
